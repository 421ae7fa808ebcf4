
use std::collections::*;
use itertools::*;

/// A list of observed timings.
///
/// Each entry is the number of cycles elapsed during a single burst of
/// measured accesses. Values only mean something relative to other values
/// collected under the same conditions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawResults(pub Vec<u64>);
impl RawResults {
    pub fn new() -> Self { Self(Vec::new()) }
    pub fn push(&mut self, x: u64) { self.0.push(x); }

    /// Produce a set of "normalized" values with the given floor value.
    pub fn normalize(&self, floor_min: i64) -> NormalizedResults {
        NormalizedResults(
            self.0.iter().map(|x| *x as i64 - floor_min).collect()
        )
    }
}

/// A *normalized* list of observed values.
#[derive(Clone, Debug)]
pub struct NormalizedResults(pub Vec<i64>);

/// Implemented on types which contain a list of observed values.
///
/// Most of these return `None` when the list is empty.
pub trait ResultList<D: Copy + Ord> {
    /// Return a reference to the list of values.
    fn data(&self) -> &Vec<D>;

    /// Return the number of observed values.
    fn len(&self) -> usize { self.data().len() }

    fn is_empty(&self) -> bool { self.data().is_empty() }

    /// Return the minimum value in the list.
    fn get_min(&self) -> Option<D> { self.data().iter().min().copied() }

    /// Return the maximum value in the list.
    fn get_max(&self) -> Option<D> { self.data().iter().max().copied() }

    /// Return the most-frequent value in the list.
    fn get_mode(&self) -> Option<D> {
        self.histogram().into_iter()
            .max_by(|x, y| x.1.cmp(&y.1))
            .map(|(val, _)| val)
    }

    /// Return the median value in the list.
    fn get_median(&self) -> Option<D> {
        let sorted = self.data().iter().copied().sorted().collect_vec();
        sorted.get(sorted.len() / 2).copied()
    }

    /// Return an iterator over values in the list.
    fn iter<'a>(&'a self) -> impl Iterator<Item=&'a D> where D: 'a {
        self.data().iter()
    }

    /// Return a histogram counting the distribution of all values in the list.
    fn histogram(&self) -> BTreeMap<D, usize> {
        let mut dist = BTreeMap::new();
        for r in self.data().iter() {
            *dist.entry(*r).or_insert(0) += 1;
        }
        dist
    }

    /// Returns the number of times that a particular value occurs in the list.
    fn count(&self, val: D) -> usize {
        self.iter().filter(|x| **x == val).count()
    }

    /// Return the indexes of all values in the list for which the given
    /// function `f` returns `true`.
    fn filter(&self, mut f: impl FnMut(D) -> bool) -> Vec<usize> {
        self.iter().enumerate().filter(|(_, x)| f(**x))
            .map(|(idx, _)| idx).collect()
    }
}

impl ResultList<u64> for RawResults {
    fn data(&self) -> &Vec<u64> { &self.0 }
}
impl ResultList<i64> for NormalizedResults {
    fn data(&self) -> &Vec<i64> { &self.0 }
}

impl RawResults {
    /// Return the mean of all values.
    pub fn mean(&self) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }
        Some(self.0.iter().map(|x| *x as f64).sum::<f64>() / self.0.len() as f64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn summary() {
        let r = RawResults(vec![5, 3, 9, 3, 7]);
        assert_eq!(r.len(), 5);
        assert_eq!(r.get_min(), Some(3));
        assert_eq!(r.get_max(), Some(9));
        assert_eq!(r.get_mode(), Some(3));
        assert_eq!(r.get_median(), Some(5));
        assert_eq!(r.count(3), 2);
        assert_eq!(r.filter(|x| x > 4), vec![0, 2, 4]);
        assert_eq!(r.mean(), Some(5.4));
    }

    #[test]
    fn empty() {
        let r = RawResults::new();
        assert!(r.is_empty());
        assert_eq!(r.get_min(), None);
        assert_eq!(r.get_mode(), None);
        assert_eq!(r.get_median(), None);
        assert_eq!(r.mean(), None);
    }

    #[test]
    fn normalize() {
        let r = RawResults(vec![100, 120, 90]);
        assert_eq!(r.normalize(100).0, vec![0, 20, -10]);
        assert_eq!(r.normalize(100).get_min(), Some(-10));
    }
}
