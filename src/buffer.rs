//! Fixed-capacity sort buffer.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::Sample;

/// Sort buffer error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Buffer capacity must be positive.
    ZeroCapacity,
    /// Buffer holds no samples.
    Empty,
    /// Output slice can't hold all the buffered samples.
    OutputTooSmall { required: usize, provided: usize },
}

impl Error for BufferError {}

impl Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            BufferError::ZeroCapacity => write!(f, "buffer capacity must be greater than zero"),
            BufferError::Empty => write!(f, "buffer is empty"),
            BufferError::OutputTooSmall { required, provided } => write!(
                f,
                "output is too small: {} samples required, {} provided",
                required, provided
            ),
        }
    }
}

/// Bounded ring of samples that is sorted in place before being flushed as a run.
///
/// Samples are kept in arrival order until [`SortBuffer::sort`] is called. The storage is allocated once
/// at construction and reused across fill/flush cycles: [`SortBuffer::clear`] moves the logical start of
/// the ring past the released samples instead of releasing memory, so consecutive runs occupy the ring
/// with different offsets.
#[derive(Debug, Clone)]
pub struct SortBuffer {
    slots: Box<[Sample]>,
    head: usize,
    len: usize,
    sorted: bool,
}

impl SortBuffer {
    /// Creates a buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }

        return Ok(SortBuffer {
            slots: vec![0; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
            sorted: true,
        });
    }

    /// Appends a sample. Returns `false` and leaves the buffer untouched if the buffer is full.
    pub fn insert(&mut self, value: Sample) -> bool {
        if self.is_full() {
            return false;
        }

        let slot = self.slot(self.len);
        self.slots[slot] = value;
        self.len += 1;
        self.sorted = self.len == 1;

        return true;
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of buffered samples.
    pub fn size(&self) -> usize {
        self.len
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Checks if no sample was inserted since the last [`SortBuffer::sort`] or [`SortBuffer::clear`].
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Sorts buffered samples in non-decreasing order.
    ///
    /// Insertion sort over the logical ring positions: each sample is shifted backward through the
    /// already sorted prefix, which begins at the ring head. Quadratic in the buffer size and
    /// allocation free. Equal samples may change their relative order.
    pub fn sort(&mut self) {
        for i in 1..self.len {
            let key = self.slots[self.slot(i)];

            let mut j = i;
            while j > 0 {
                let prev = self.slots[self.slot(j - 1)];
                if prev <= key {
                    break;
                }
                let dst = self.slot(j);
                self.slots[dst] = prev;
                j -= 1;
            }

            let dst = self.slot(j);
            self.slots[dst] = key;
        }

        self.sorted = true;
    }

    /// Copies buffered samples in their current logical order into `output`.
    /// Returns the number of copied samples, which is always [`SortBuffer::size`].
    pub fn get_data(&self, output: &mut [Sample]) -> Result<usize, BufferError> {
        if self.is_empty() {
            return Err(BufferError::Empty);
        }
        if output.len() < self.len {
            return Err(BufferError::OutputTooSmall {
                required: self.len,
                provided: output.len(),
            });
        }

        for (dst, value) in output.iter_mut().zip(self.iter()) {
            *dst = value;
        }

        return Ok(self.len);
    }

    /// Returns an iterator over buffered samples in their current logical order.
    pub fn iter(&self) -> impl Iterator<Item = Sample> + '_ {
        (0..self.len).map(move |i| self.slots[self.slot(i)])
    }

    /// Releases all buffered samples.
    pub fn clear(&mut self) {
        self.head = self.slot(self.len);
        self.len = 0;
        self.sorted = true;
    }

    fn slot(&self, logical: usize) -> usize {
        (self.head + logical) % self.slots.len()
    }
}

#[cfg(test)]
mod test {
    use rand::seq::SliceRandom;
    use rand::Rng;
    use rstest::*;

    use super::{BufferError, SortBuffer};

    fn contents(buffer: &SortBuffer) -> Vec<i32> {
        buffer.iter().collect()
    }

    #[test]
    fn test_zero_capacity() {
        assert_eq!(SortBuffer::new(0).unwrap_err(), BufferError::ZeroCapacity);
    }

    #[rstest]
    #[case(1, 1)]
    #[case(4, 0)]
    #[case(4, 3)]
    #[case(4, 4)]
    fn test_size_tracks_inserts(#[case] capacity: usize, #[case] inserts: usize) {
        let mut buffer = SortBuffer::new(capacity).unwrap();
        for value in 0..inserts {
            assert!(buffer.insert(value as i32));
        }

        assert_eq!(buffer.size(), inserts);
        assert_eq!(buffer.is_empty(), inserts == 0);
        assert_eq!(buffer.is_full(), inserts == capacity);
    }

    #[test]
    fn test_insert_into_full_buffer() {
        let mut buffer = SortBuffer::new(3).unwrap();
        assert!(buffer.insert(3));
        assert!(buffer.insert(1));
        assert!(buffer.insert(2));

        assert_eq!(buffer.insert(0), false);
        assert_eq!(buffer.size(), 3);
        assert_eq!(contents(&buffer), vec![3, 1, 2]);
    }

    #[rstest]
    #[case(vec![], vec![])]
    #[case(vec![42], vec![42])]
    #[case(vec![7, 2, 9, 4], vec![2, 4, 7, 9])]
    #[case(vec![1, 2, 3, 4, 5], vec![1, 2, 3, 4, 5])]
    #[case(vec![5, 4, 3, 2, 1], vec![1, 2, 3, 4, 5])]
    #[case(vec![3, -1, 3, 0, -1], vec![-1, -1, 0, 3, 3])]
    #[case(vec![i32::MAX, 0, i32::MIN], vec![i32::MIN, 0, i32::MAX])]
    fn test_sort(#[case] input: Vec<i32>, #[case] expected: Vec<i32>) {
        let mut buffer = SortBuffer::new(8).unwrap();
        for value in input {
            assert!(buffer.insert(value));
        }

        buffer.sort();
        assert_eq!(contents(&buffer), expected);
        assert!(buffer.is_sorted());

        buffer.sort();
        assert_eq!(contents(&buffer), expected);
    }

    #[test]
    fn test_sort_preserves_samples() {
        let mut rng = rand::thread_rng();
        let mut buffer = SortBuffer::new(64).unwrap();
        let mut input: Vec<i32> = (0..64).map(|_| rng.gen_range(-10..10)).collect();
        input.shuffle(&mut rng);

        for value in &input {
            assert!(buffer.insert(*value));
        }
        buffer.sort();

        input.sort();
        assert_eq!(contents(&buffer), input);
    }

    #[test]
    fn test_sort_across_ring_boundary() {
        let mut buffer = SortBuffer::new(4).unwrap();
        assert!(buffer.insert(10));
        assert!(buffer.insert(20));
        assert!(buffer.insert(30));
        buffer.clear();

        // the next fill starts at slot 3 and wraps to slots 0..=2
        for value in [9, 3, 6, 1] {
            assert!(buffer.insert(value));
        }
        assert_eq!(contents(&buffer), vec![9, 3, 6, 1]);

        buffer.sort();
        assert_eq!(contents(&buffer), vec![1, 3, 6, 9]);
    }

    #[test]
    fn test_sorted_flag() {
        let mut buffer = SortBuffer::new(4).unwrap();
        assert!(buffer.is_sorted());

        buffer.insert(2);
        assert!(buffer.is_sorted());
        buffer.insert(1);
        assert_eq!(buffer.is_sorted(), false);

        buffer.sort();
        assert!(buffer.is_sorted());
        buffer.insert(0);
        assert_eq!(buffer.is_sorted(), false);

        buffer.clear();
        assert!(buffer.is_sorted());
    }

    #[test]
    fn test_get_data() {
        let mut buffer = SortBuffer::new(4).unwrap();
        for value in [7, 2, 9] {
            buffer.insert(value);
        }
        buffer.sort();

        let mut output = [0; 5];
        assert_eq!(buffer.get_data(&mut output), Ok(3));
        assert_eq!(output, [2, 7, 9, 0, 0]);
    }

    #[test]
    fn test_get_data_preconditions() {
        let mut buffer = SortBuffer::new(4).unwrap();
        let mut output = [0; 2];
        assert_eq!(buffer.get_data(&mut output), Err(BufferError::Empty));

        for value in [1, 2, 3] {
            buffer.insert(value);
        }
        assert_eq!(
            buffer.get_data(&mut output),
            Err(BufferError::OutputTooSmall {
                required: 3,
                provided: 2
            })
        );
        assert_eq!(output, [0, 0]);
    }

    #[test]
    fn test_clear() {
        let mut buffer = SortBuffer::new(2).unwrap();
        buffer.insert(1);
        buffer.insert(2);
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 2);
        assert!(buffer.insert(5));
        assert!(buffer.insert(4));
        assert_eq!(buffer.insert(3), false);
        assert_eq!(contents(&buffer), vec![5, 4]);
    }
}
