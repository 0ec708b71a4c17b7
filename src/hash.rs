//! Stable fingerprints of build commands, recorded in the build log so the
//! next invocation can tell when a command line changed.
//!
//! std's default hasher is allowed to change between Rust releases, which
//! would spuriously rebuild the world after a toolchain upgrade, so the
//! persisted hash is MetroHash64 with a fixed seed.

use std::hash::Hasher;

use metrohash::MetroHash64;

use crate::graph::RspFile;

const SEED: u64 = 0xb11d;
const UNIT_SEPARATOR: u8 = 0x1F;

/// Hash the expanded command line.  Response file content, when present, is
/// folded in so that editing the rspfile template forces a rerun even though
/// the command line itself is unchanged.
pub fn hash_command(command: &str, rspfile: Option<&RspFile>) -> u64 {
    let mut hasher = MetroHash64::with_seed(SEED);
    hasher.write(command.as_bytes());
    if let Some(rspfile) = rspfile {
        hasher.write_u8(UNIT_SEPARATOR);
        hasher.write(rspfile.content.as_bytes());
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_across_calls() {
        let a = hash_command("cc -c foo.c -o foo.o", None);
        let b = hash_command("cc -c foo.c -o foo.o", None);
        assert_eq!(a, b);
    }

    #[test]
    fn command_change_changes_hash() {
        let a = hash_command("cc -c foo.c", None);
        let b = hash_command("cc -c foo.c -O2", None);
        assert_ne!(a, b);
    }

    #[test]
    fn rspfile_content_affects_hash() {
        let rsp = |content: &str| RspFile {
            path: "out.rsp".into(),
            content: content.into(),
        };
        let a = hash_command("cc @out.rsp", Some(&rsp("foo.o bar.o")));
        let b = hash_command("cc @out.rsp", Some(&rsp("foo.o baz.o")));
        assert_ne!(a, b);
        assert_ne!(a, hash_command("cc @out.rsp", None));
    }
}
