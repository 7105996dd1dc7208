use core::slice::Iter;

use boyer_moore_magiclen::{BMByte, BMByteSearchable};

struct HeadWindow<'a>(&'a [u8]);

impl BMByteSearchable for HeadWindow<'_> {
    #[inline]
    fn len(&self) -> usize { self.0.len() }

    #[inline]
    fn value_at(&self, index: usize) -> u8 { self.0[index] }

    #[inline]
    fn iter(&self) -> Iter<'_, u8> { self.0.iter() }
}

/// Offset of the first body byte, i.e. just past the blank line that ends the
/// request head. `None` until the whole head is in `buffer`.
pub fn find_body_start(buffer: &[u8]) -> Option<usize> {
    lazy_static! {
        static ref HEAD_END: Option<BMByte> = BMByte::from("\r\n\r\n");
    };

    let delim = HEAD_END.as_ref()?;
    delim
        .find_in(HeadWindow(buffer), 1)
        .first()
        .map(|idx| idx + 4)
}
