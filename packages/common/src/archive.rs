//! gzip-compressed tar archives of problem directories.

use std::io;
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder};

/// Pack `dir` into a `.tar.gz` held in memory. Entries are relative to `dir`
/// and symlinks are archived as the files they point to.
pub fn pack_dir(dir: &Path) -> io::Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(true);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()?.finish()
}

/// Unpack a `.tar.gz` produced by [`pack_dir`] into `dest`, which must exist.
pub fn unpack(targz: &[u8], dest: &Path) -> io::Result<()> {
    let mut archive = Archive::new(GzDecoder::new(targz));
    archive.set_preserve_permissions(true);
    archive.unpack(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_pack_and_unpack_tree() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("judge.cc"), "int main() {}\n").unwrap();
        fs::create_dir(src.path().join("tests")).unwrap();
        fs::write(src.path().join("tests/1.in"), "1 2\n").unwrap();

        let targz = pack_dir(src.path()).unwrap();
        assert_eq!(&targz[..2], &[0x1f, 0x8b]);

        let dest = tempfile::tempdir().unwrap();
        unpack(&targz, dest.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dest.path().join("judge.cc")).unwrap(),
            "int main() {}\n"
        );
        assert_eq!(
            fs::read_to_string(dest.path().join("tests/1.in")).unwrap(),
            "1 2\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_pack_follows_symlinks() {
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("data.txt"), "shared").unwrap();

        let src = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("data.txt"), src.path().join("data.txt"))
            .unwrap();

        let dest = tempfile::tempdir().unwrap();
        unpack(&pack_dir(src.path()).unwrap(), dest.path()).unwrap();

        let unpacked = dest.path().join("data.txt");
        assert!(!fs::symlink_metadata(&unpacked).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(unpacked).unwrap(), "shared");
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        let dest = tempfile::tempdir().unwrap();
        assert!(unpack(b"not a tarball", dest.path()).is_err());
    }
}
