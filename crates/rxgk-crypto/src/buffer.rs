//! Fragmented packet buffers and scatter lists
//!
//! Received packets rarely sit in one contiguous allocation. A
//! [`FragmentedBuffer`] is an ordered list of [`BytesMut`] fragments addressed
//! as a single logical byte range. The engines never operate on the buffer
//! directly: they ask for a [`ScatterList`] covering exactly the region they
//! need, and that list can address at most [`MAX_FRAGMENTS`] fragments.
//! Needing more is a resource error; nothing is coalesced behind the caller's
//! back.

use arrayvec::ArrayVec;
use bytes::BytesMut;

use crate::error::CryptoError;

/// Maximum fragments a scatter list can address.
pub const MAX_FRAGMENTS: usize = 16;

/// `(offset, len)` pair addressing bytes of a [`FragmentedBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    /// Offset of the first byte
    pub offset: usize,
    /// Number of bytes
    pub len: usize,
}

impl Region {
    /// Region of `len` bytes starting at `offset`.
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// Offset one past the last byte, `None` on overflow.
    pub fn end(&self) -> Option<usize> {
        self.offset.checked_add(self.len)
    }
}

/// Logical byte region stored as discontiguous fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentedBuffer {
    fragments: Vec<BytesMut>,
}

impl FragmentedBuffer {
    /// Empty buffer with no fragments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer holding `data` in a single fragment.
    pub fn contiguous(data: &[u8]) -> Self {
        Self { fragments: vec![BytesMut::from(data)] }
    }

    /// Buffer made of the given fragments, in order.
    pub fn from_fragments(fragments: impl IntoIterator<Item = BytesMut>) -> Self {
        Self { fragments: fragments.into_iter().collect() }
    }

    /// Append a fragment.
    pub fn push(&mut self, fragment: BytesMut) {
        self.fragments.push(fragment);
    }

    /// Total bytes across all fragments.
    pub fn len(&self) -> usize {
        self.fragments.iter().map(BytesMut::len).sum()
    }

    /// True if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fragments, including empty ones.
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Merge all fragments into one.
    ///
    /// Callers use this to retry after [`CryptoError::TooManyFragments`].
    pub fn coalesce(&mut self) {
        if self.fragments.len() <= 1 {
            return;
        }
        let mut merged = BytesMut::with_capacity(self.len());
        for fragment in self.fragments.drain(..) {
            merged.extend_from_slice(&fragment);
        }
        self.fragments.push(merged);
    }

    /// Copy a region out into a contiguous vector.
    pub fn copy_region(&self, region: Region) -> Result<Vec<u8>, CryptoError> {
        self.check_bounds(region)?;
        let mut out = Vec::with_capacity(region.len);
        let mut skip = region.offset;
        for fragment in &self.fragments {
            if out.len() == region.len {
                break;
            }
            if skip >= fragment.len() {
                skip -= fragment.len();
                continue;
            }
            let take = (fragment.len() - skip).min(region.len - out.len());
            out.extend_from_slice(&fragment[skip..skip + take]);
            skip = 0;
        }
        Ok(out)
    }

    /// Copy the whole buffer into a contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for fragment in &self.fragments {
            out.extend_from_slice(fragment);
        }
        out
    }

    /// Count the non-empty fragments overlapping `region`.
    pub fn fragments_needed(&self, region: Region) -> Result<usize, CryptoError> {
        self.check_bounds(region)?;
        let mut skip = region.offset;
        let mut remaining = region.len;
        let mut needed = 0;
        for fragment in &self.fragments {
            if remaining == 0 {
                break;
            }
            if skip >= fragment.len() {
                skip -= fragment.len();
                continue;
            }
            let take = (fragment.len() - skip).min(remaining);
            needed += 1;
            remaining -= take;
            skip = 0;
        }
        Ok(needed)
    }

    /// Scatter list covering exactly `region`.
    ///
    /// # Errors
    ///
    /// - `RegionOutOfBounds` if the region does not fit in the buffer
    /// - `TooManyFragments` if more than [`MAX_FRAGMENTS`] fragments overlap it
    pub fn scatter_list(&mut self, region: Region) -> Result<ScatterList<'_>, CryptoError> {
        let needed = self.fragments_needed(region)?;
        if needed > MAX_FRAGMENTS {
            return Err(CryptoError::TooManyFragments { needed, max: MAX_FRAGMENTS });
        }

        let mut segments = ArrayVec::new();
        let mut skip = region.offset;
        let mut remaining = region.len;
        for fragment in &mut self.fragments {
            if remaining == 0 {
                break;
            }
            let fragment_len = fragment.len();
            if skip >= fragment_len {
                skip -= fragment_len;
                continue;
            }
            let take = (fragment_len - skip).min(remaining);
            let segment: &mut [u8] = &mut fragment[skip..skip + take];
            segments
                .try_push(segment)
                .map_err(|_| CryptoError::TooManyFragments { needed, max: MAX_FRAGMENTS })?;
            remaining -= take;
            skip = 0;
        }

        Ok(ScatterList { segments, len: region.len })
    }

    fn check_bounds(&self, region: Region) -> Result<(), CryptoError> {
        let buffer_len = self.len();
        match region.end() {
            Some(end) if end <= buffer_len => Ok(()),
            _ => Err(CryptoError::RegionOutOfBounds {
                offset: region.offset,
                len: region.len,
                buffer_len,
            }),
        }
    }
}

/// Mutable view of a region as at most [`MAX_FRAGMENTS`] slices.
///
/// Offsets passed to the methods are relative to the start of the region.
#[derive(Debug)]
pub struct ScatterList<'a> {
    segments: ArrayVec<&'a mut [u8], MAX_FRAGMENTS>,
    len: usize,
}

impl ScatterList<'_> {
    /// Length of the covered region.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the region is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slices in the list.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), CryptoError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(CryptoError::RegionOutOfBounds { offset, len, buffer_len: self.len }),
        }
    }

    /// Copy `dst.len()` bytes starting at `offset` out of the list.
    pub fn gather(&self, offset: usize, dst: &mut [u8]) -> Result<(), CryptoError> {
        self.check(offset, dst.len())?;
        let mut skip = offset;
        let mut done = 0;
        for segment in &self.segments {
            if done == dst.len() {
                break;
            }
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            let take = (segment.len() - skip).min(dst.len() - done);
            dst[done..done + take].copy_from_slice(&segment[skip..skip + take]);
            done += take;
            skip = 0;
        }
        Ok(())
    }

    /// Copy `src` into the list starting at `offset`.
    pub fn scatter(&mut self, offset: usize, src: &[u8]) -> Result<(), CryptoError> {
        self.check(offset, src.len())?;
        let mut skip = offset;
        let mut done = 0;
        for segment in &mut self.segments {
            if done == src.len() {
                break;
            }
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            let take = (segment.len() - skip).min(src.len() - done);
            segment[skip..skip + take].copy_from_slice(&src[done..done + take]);
            done += take;
            skip = 0;
        }
        Ok(())
    }

    /// Borrow `len` bytes at `offset` as slices, without copying.
    pub fn slices(
        &self,
        offset: usize,
        len: usize,
    ) -> Result<ArrayVec<&[u8], MAX_FRAGMENTS>, CryptoError> {
        self.check(offset, len)?;
        let mut out = ArrayVec::new();
        let mut skip = offset;
        let mut remaining = len;
        for segment in &self.segments {
            if remaining == 0 {
                break;
            }
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            let take = (segment.len() - skip).min(remaining);
            out.push(&segment[skip..skip + take]);
            remaining -= take;
            skip = 0;
        }
        Ok(out)
    }
}
