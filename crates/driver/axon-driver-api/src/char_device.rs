//! Character device trait for `devfs` nodes backed by a live driver
//! (the keyboard/TTY ring, `/dev/null`, `/dev/zero`).

use crate::block::IoError;

/// A byte-stream device that can be read and written without seeking.
pub trait CharDeviceOps: Send + Sync {
    /// Reads up to `buf.len()` bytes, returning the number read.
    ///
    /// A return of `Ok(0)` means no data is currently available, not
    /// end-of-stream — devfs nodes never signal EOF.
    fn read(&self, buf: &mut [u8]) -> Result<usize, IoError>;

    /// Writes `buf`, returning the number of bytes accepted.
    fn write(&self, buf: &[u8]) -> Result<usize, IoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null;

    impl CharDeviceOps for Null {
        fn read(&self, _buf: &mut [u8]) -> Result<usize, IoError> {
            Ok(0)
        }

        fn write(&self, buf: &[u8]) -> Result<usize, IoError> {
            Ok(buf.len())
        }
    }

    #[test]
    fn null_device_discards_writes_and_reads_nothing() {
        let dev = Null;
        let mut buf = [0u8; 8];
        assert_eq!(dev.read(&mut buf), Ok(0));
        assert_eq!(dev.write(b"hello"), Ok(5));
    }
}
