//! Bounds-checked little/big-endian readers over a shrinking byte slice, plus
//! the matching writers. Shapefiles mix both byte orders in the same header.

use std::io::{self, ErrorKind, Write};

#[inline(always)]
pub(crate) fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated shapefile data"))
    } else {
        Ok(())
    }
}

#[inline(always)]
pub(crate) fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
pub(crate) fn le_u8(buf: &mut &[u8]) -> io::Result<u8> {
    Ok(take(buf, 1)?[0])
}

#[inline(always)]
pub(crate) fn le_u16(buf: &mut &[u8]) -> io::Result<u16> {
    let b = take(buf, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

#[inline(always)]
pub(crate) fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
pub(crate) fn le_i32(buf: &mut &[u8]) -> io::Result<i32> {
    let b = take(buf, 4)?;
    Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
pub(crate) fn be_i32(buf: &mut &[u8]) -> io::Result<i32> {
    let b = take(buf, 4)?;
    Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
pub(crate) fn le_f64(buf: &mut &[u8]) -> io::Result<f64> {
    let b = take(buf, 8)?;
    Ok(f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

#[cold]
pub(crate) fn bad(msg: impl Into<String>) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg.into())
}

#[inline]
pub(crate) fn write_u16<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
pub(crate) fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
pub(crate) fn write_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
pub(crate) fn write_be_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_be_bytes())
}

#[inline]
pub(crate) fn write_f64<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_endian_reads_advance_the_slice() {
        let mut bytes = Vec::new();
        write_be_i32(&mut bytes, 9994).unwrap();
        write_i32(&mut bytes, 1000).unwrap();
        write_f64(&mut bytes, -1.5).unwrap();

        let mut p = bytes.as_slice();
        assert_eq!(be_i32(&mut p).unwrap(), 9994);
        assert_eq!(le_i32(&mut p).unwrap(), 1000);
        assert_eq!(le_f64(&mut p).unwrap(), -1.5);
        assert!(p.is_empty());

        let err = le_u32(&mut p).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }
}
