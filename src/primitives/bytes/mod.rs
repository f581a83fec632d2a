#![forbid(unsafe_code)]
//! Fixed-width field access for on-page structures.

pub mod ne {
    //! Native-endian integer fields at arbitrary byte offsets.
    //!
    //! Every on-page integer is stored in the byte order of the build that
    //! created the file; the storage header's architecture fingerprint keeps
    //! foreign files from being opened.

    use core::convert::TryInto;

    use crate::types::PageAddr;

    /// Reads a `u32` at `off`.
    #[inline]
    pub fn get_u32(src: &[u8], off: usize) -> u32 {
        let bytes: [u8; 4] = src[off..off + 4]
            .try_into()
            .expect("slice of length 4 converts");
        u32::from_ne_bytes(bytes)
    }

    /// Writes a `u32` at `off`.
    #[inline]
    pub fn put_u32(dst: &mut [u8], off: usize, v: u32) {
        dst[off..off + 4].copy_from_slice(&v.to_ne_bytes());
    }

    /// Reads a `u64` at `off`.
    #[inline]
    pub fn get_u64(src: &[u8], off: usize) -> u64 {
        let bytes: [u8; 8] = src[off..off + 8]
            .try_into()
            .expect("slice of length 8 converts");
        u64::from_ne_bytes(bytes)
    }

    /// Writes a `u64` at `off`.
    #[inline]
    pub fn put_u64(dst: &mut [u8], off: usize, v: u64) {
        dst[off..off + 8].copy_from_slice(&v.to_ne_bytes());
    }

    /// Reads a page address at `off`.
    #[inline]
    pub fn get_addr(src: &[u8], off: usize) -> PageAddr {
        PageAddr(get_u64(src, off))
    }

    /// Writes a page address at `off`.
    #[inline]
    pub fn put_addr(dst: &mut [u8], off: usize, addr: PageAddr) {
        put_u64(dst, off, addr.0);
    }
}

#[cfg(test)]
mod tests {
    use super::ne;
    use crate::types::PageAddr;

    #[test]
    fn fields_do_not_clobber_neighbours() {
        let mut buf = [0xAAu8; 24];
        ne::put_u32(&mut buf, 4, 0x0102_0304);
        ne::put_addr(&mut buf, 8, PageAddr(4096));
        assert_eq!(&buf[..4], &[0xAA; 4]);
        assert_eq!(ne::get_u32(&buf, 4), 0x0102_0304);
        assert_eq!(ne::get_addr(&buf, 8), PageAddr(4096));
        assert_eq!(&buf[16..], &[0xAA; 8]);
    }
}
