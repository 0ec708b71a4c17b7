//! The persistent command log: per output path, the fingerprint of the
//! command that last produced it and when.  This is what lets the next
//! invocation notice "command line changed" and restat-style staleness.
//!
//! On-disk it is the ninja text format: a version header line, then one
//! tab-separated entry per finished command.  Appends during a build are a
//! single write each; recompaction rewrites the file via rename.

use std::collections::HashMap;
use std::fs;
use std::io::Write;

use anyhow::{anyhow, bail};

use crate::graph::MTime;

const LOG_SIGNATURE: &str = "# ninja log v";
const LOG_VERSION: u32 = 5;

/// Entries below this count never trigger recompaction.
const MIN_COMPACTION_ENTRIES: usize = 100;
/// Recompact when the log holds this many dead lines per live one.
const COMPACTION_RATIO: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub output: String,
    pub command_hash: u64,
    /// Times are milliseconds relative to the start of the recording build.
    pub start_time: i32,
    pub end_time: i32,
    /// For restat edges this is the newest input's mtime rather than the
    /// (unchanged) output's own.
    pub mtime: MTime,
}

#[derive(Default)]
pub struct BuildLog {
    entries: HashMap<String, LogEntry>,
    file: Option<fs::File>,
    needs_recompaction: bool,
}

fn format_entry(entry: &LogEntry) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{:x}\n",
        entry.start_time,
        entry.end_time,
        entry.mtime.nanos(),
        entry.output,
        entry.command_hash
    )
}

fn parse_entry(line: &str) -> Option<LogEntry> {
    let mut fields = line.split('\t');
    let start_time = fields.next()?.parse().ok()?;
    let end_time = fields.next()?.parse().ok()?;
    let mtime = MTime::from_nanos(fields.next()?.parse().ok()?);
    let output = fields.next()?.to_string();
    let command_hash = u64::from_str_radix(fields.next()?, 16).ok()?;
    Some(LogEntry {
        output,
        command_hash,
        start_time,
        end_time,
        mtime,
    })
}

impl BuildLog {
    pub fn new() -> BuildLog {
        BuildLog::default()
    }

    /// Read a log file into memory.  Damage is tolerated: unknown versions
    /// restart the log, malformed or truncated lines are dropped.  Returns
    /// a warning message when something was off.
    pub fn load(&mut self, path: &str) -> anyhow::Result<Option<String>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => bail!("read {}: {}", path, err),
        };
        let text = String::from_utf8_lossy(&bytes);
        let mut lines = text.split('\n');

        match lines
            .next()
            .and_then(|header| header.strip_prefix(LOG_SIGNATURE))
            .and_then(|version| version.trim_end().parse::<u32>().ok())
        {
            Some(LOG_VERSION) => {}
            _ => {
                let _ = fs::remove_file(path);
                return Ok(Some("build log version invalid, starting over".to_string()));
            }
        }

        let mut total = 0usize;
        let truncated = !text.ends_with('\n');
        let mut lines = lines.peekable();
        while let Some(line) = lines.next() {
            if line.is_empty() {
                continue;
            }
            if truncated && lines.peek().is_none() {
                // A partial final line from a dead process; drop it.
                break;
            }
            let Some(entry) = parse_entry(line) else {
                continue;
            };
            total += 1;
            self.entries.insert(entry.output.clone(), entry);
        }

        if total > MIN_COMPACTION_ENTRIES && total > self.entries.len() * COMPACTION_RATIO {
            self.needs_recompaction = true;
        }

        Ok(None)
    }

    pub fn lookup(&self, output: &str) -> Option<&LogEntry> {
        self.entries.get(output)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Open the log for appending, recompacting first if load flagged the
    /// file as mostly dead entries.
    pub fn open_for_write(
        &mut self,
        path: &str,
        is_live: impl Fn(&str) -> bool,
    ) -> anyhow::Result<()> {
        if self.needs_recompaction {
            self.recompact(path, is_live)?;
        }
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(|err| anyhow!("opening build log: {}", err))?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "{}{}", LOG_SIGNATURE, LOG_VERSION)?;
        }
        self.file = Some(file);
        Ok(())
    }

    /// Append one entry; called per output as commands finish.
    pub fn record(
        &mut self,
        output: &str,
        command_hash: u64,
        start_time: i32,
        end_time: i32,
        mtime: MTime,
    ) -> anyhow::Result<()> {
        let entry = LogEntry {
            output: output.to_string(),
            command_hash,
            start_time,
            end_time,
            mtime,
        };
        if let Some(file) = &mut self.file {
            file.write_all(format_entry(&entry).as_bytes())
                .map_err(|err| anyhow!("writing build log: {}", err))?;
        }
        self.entries.insert(output.to_string(), entry);
        Ok(())
    }

    pub fn close(&mut self) {
        self.file = None;
    }

    /// Rewrite the log keeping only the latest entry for each live output.
    /// Writes a fresh file beside the old one and renames into place.
    pub fn recompact(&mut self, path: &str, is_live: impl Fn(&str) -> bool) -> anyhow::Result<()> {
        let temp_path = format!("{}.recompact", path);
        {
            let mut file = fs::File::create(&temp_path)
                .map_err(|err| anyhow!("opening {}: {}", temp_path, err))?;
            writeln!(file, "{}{}", LOG_SIGNATURE, LOG_VERSION)?;
            let mut outputs: Vec<&String> = self.entries.keys().collect();
            outputs.sort();
            for output in outputs {
                if !is_live(output) {
                    continue;
                }
                file.write_all(format_entry(&self.entries[output]).as_bytes())?;
            }
        }
        self.entries.retain(|output, _| is_live(output));
        fs::rename(&temp_path, path).map_err(|err| anyhow!("rename {}: {}", temp_path, err))?;
        self.needs_recompaction = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log_path() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log").to_str().unwrap().to_string();
        (dir, path)
    }

    #[test]
    fn round_trip() {
        let (_dir, path) = temp_log_path();
        let mut log = BuildLog::new();
        log.open_for_write(&path, |_| true).unwrap();
        log.record("out", 0xabcd, 10, 20, MTime::Stamp(333)).unwrap();
        log.record("out2", 0x1234, 20, 30, MTime::Stamp(444))
            .unwrap();
        log.close();

        let mut reloaded = BuildLog::new();
        assert_eq!(reloaded.load(&path).unwrap(), None);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.lookup("out"),
            Some(&LogEntry {
                output: "out".to_string(),
                command_hash: 0xabcd,
                start_time: 10,
                end_time: 20,
                mtime: MTime::Stamp(333),
            })
        );
    }

    #[test]
    fn latest_entry_wins() {
        let (_dir, path) = temp_log_path();
        let mut log = BuildLog::new();
        log.open_for_write(&path, |_| true).unwrap();
        log.record("out", 1, 0, 1, MTime::Stamp(1)).unwrap();
        log.record("out", 2, 1, 2, MTime::Stamp(2)).unwrap();
        log.close();

        let mut reloaded = BuildLog::new();
        reloaded.load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.lookup("out").unwrap().command_hash, 2);
    }

    #[test]
    fn truncated_final_line_dropped() {
        let (_dir, path) = temp_log_path();
        std::fs::write(
            &path,
            "# ninja log v5\n1\t2\t3\tout\tab\n4\t5\t6\ttrunc",
        )
        .unwrap();
        let mut log = BuildLog::new();
        assert_eq!(log.load(&path).unwrap(), None);
        assert_eq!(log.len(), 1);
        assert!(log.lookup("out").is_some());
        assert!(log.lookup("trunc").is_none());
    }

    #[test]
    fn unknown_version_starts_over() {
        let (_dir, path) = temp_log_path();
        std::fs::write(&path, "# ninja log v42\n1\t2\t3\tout\tab\n").unwrap();
        let mut log = BuildLog::new();
        let warning = log.load(&path).unwrap();
        assert_eq!(
            warning.as_deref(),
            Some("build log version invalid, starting over")
        );
        assert!(log.is_empty());
        assert!(!std::path::Path::new(&path).exists());
    }

    #[test]
    fn malformed_lines_skipped() {
        let (_dir, path) = temp_log_path();
        std::fs::write(
            &path,
            "# ninja log v5\ngarbage line\n1\t2\t3\tout\tff\n",
        )
        .unwrap();
        let mut log = BuildLog::new();
        log.load(&path).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn recompact_drops_dead_outputs() {
        let (_dir, path) = temp_log_path();
        let mut log = BuildLog::new();
        log.open_for_write(&path, |_| true).unwrap();
        log.record("live", 1, 0, 1, MTime::Stamp(1)).unwrap();
        log.record("dead", 2, 0, 1, MTime::Stamp(1)).unwrap();
        log.close();
        log.recompact(&path, |output| output == "live").unwrap();

        let mut reloaded = BuildLog::new();
        reloaded.load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.lookup("live").is_some());
        assert!(reloaded.lookup("dead").is_none());
    }
}
