// MPEVAL: Performance Metrics of Multi-Path Transport Benchmarks from Captured Artifacts
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Conversion of captured pcap files into their textual `tcpdump` rendering.
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};

use itertools::Itertools;

/// Default converter executable.
pub const TCPDUMP: &str = "tcpdump";

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("File not found: {0:?}")]
    NotFound(PathBuf),
    #[error("{0} not found. Please install {0}.")]
    ToolNotFound(String),
    #[error("Error running {tool} on {path:?} ({status}): {stderr}")]
    ToolFailed {
        tool: String,
        path: PathBuf,
        status: ExitStatus,
        stderr: String,
    },
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// State of a single capture file within a conversion batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Pending,
    /// Converted into the given text file.
    Converted(PathBuf),
    /// The capture file does not exist.
    Missing,
    /// The converter could not be run or exited with an error.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CaptureJob {
    pub pcap_path: PathBuf,
    pub status: CaptureStatus,
}

impl CaptureJob {
    pub fn new(pcap_path: impl Into<PathBuf>) -> Self {
        Self {
            pcap_path: pcap_path.into(),
            status: CaptureStatus::Pending,
        }
    }

    /// Sibling text file that receives the converter output.
    pub fn txt_path(&self) -> PathBuf {
        txt_path(&self.pcap_path)
    }
}

/// Text file written by the converter for a capture: the same path with a `.txt` extension.
pub fn txt_path(pcap_path: &Path) -> PathBuf {
    pcap_path.with_extension("txt")
}

/// Runs an external capture-to-text tool, by default `tcpdump -r <pcap> -nn -vv -X`:
///
/// - `-nn`: no address or port name resolution
/// - `-vv`: very verbose header decoding
/// - `-X`: hex and ASCII dump of the packet contents
#[derive(Clone, Debug)]
pub struct CaptureConverter {
    pub tool: String,
    pub flags: Vec<String>,
}

impl Default for CaptureConverter {
    fn default() -> Self {
        Self::new(TCPDUMP)
    }
}

impl CaptureConverter {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            flags: ["-nn", "-vv", "-X"].map(String::from).to_vec(),
        }
    }

    /// Command-line arguments passed to the tool for the given capture.
    pub fn args(&self, pcap_path: &Path) -> Vec<String> {
        ["-r".to_string(), pcap_path.to_string_lossy().to_string()]
            .into_iter()
            .chain(self.flags.iter().cloned())
            .collect_vec()
    }

    /// Convert a single capture and return the path of the written text file.
    ///
    /// The output file is opened before the tool is started and receives its standard output
    /// unchanged, so a failing tool may leave an empty or truncated file behind.
    pub fn convert(&self, pcap_path: &Path) -> Result<PathBuf, ConvertError> {
        if !pcap_path.exists() {
            return Err(ConvertError::NotFound(pcap_path.to_path_buf()));
        }

        let txt_path = txt_path(pcap_path);
        let outfile = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&txt_path)?;

        let args = self.args(pcap_path);
        log::debug!("Running:\n{} '{}'", self.tool, args.join("' '"));

        let output = match Command::new(&self.tool)
            .args(&args)
            .stdout(Stdio::from(outfile))
            .stderr(Stdio::piped())
            .output()
        {
            Ok(output) => output,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConvertError::ToolNotFound(self.tool.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            return Err(ConvertError::ToolFailed {
                tool: self.tool.clone(),
                path: pcap_path.to_path_buf(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(txt_path)
    }

    /// Execute a pending job and record its outcome. Never fails: every error ends up in the
    /// job status and the log.
    pub fn run(&self, job: &mut CaptureJob) {
        job.status = match self.convert(&job.pcap_path) {
            Ok(txt_path) => {
                log::info!("Successfully converted: {:?} -> {:?}", job.pcap_path, txt_path);
                CaptureStatus::Converted(txt_path)
            }
            Err(ConvertError::NotFound(path)) => {
                log::warn!("File not found: {path:?}");
                CaptureStatus::Missing
            }
            Err(e) => {
                log::error!("{e}");
                CaptureStatus::Failed(e.to_string())
            }
        };
    }

    /// Convert all captures in the given order.
    pub fn convert_all<P: AsRef<Path>>(&self, pcaps: impl IntoIterator<Item = P>) -> Vec<CaptureJob> {
        pcaps
            .into_iter()
            .map(|p| {
                let mut job = CaptureJob::new(p.as_ref());
                self.run(&mut job);
                job
            })
            .collect_vec()
    }
}

/// List all capture files matching a glob pattern, in natural order (`adhoc2` before `adhoc10`).
pub fn find_captures(pattern: &str) -> Result<Vec<PathBuf>, ConvertError> {
    Ok(glob::glob(pattern)?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("Cannot read {:?}: {}", e.path(), e.error());
                None
            }
        })
        .sorted_by(|a, b| human_sort::compare(&a.to_string_lossy(), &b.to_string_lossy()))
        .collect_vec())
}

/// Counts of the final job states of a conversion batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    pub converted: usize,
    pub missing: usize,
    pub failed: usize,
}

impl ConversionSummary {
    pub fn from_jobs(jobs: &[CaptureJob]) -> Self {
        jobs.iter().fold(Self::default(), |mut s, job| {
            match job.status {
                CaptureStatus::Converted(_) => s.converted += 1,
                CaptureStatus::Missing => s.missing += 1,
                CaptureStatus::Failed(_) => s.failed += 1,
                CaptureStatus::Pending => {}
            }
            s
        })
    }
}

impl fmt::Display for ConversionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} converted, {} not found, {} failed",
            self.converted, self.missing, self.failed
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("mpeval-utils-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn tcpdump_arguments() {
        assert_eq!(
            CaptureConverter::default().args(Path::new("a---trace-enp0s3.pcap")),
            vec!["-r", "a---trace-enp0s3.pcap", "-nn", "-vv", "-X"]
        );
    }

    #[test]
    fn txt_path_replaces_extension() {
        let job = CaptureJob::new("dmptcp---dynamic2----AP1---trace-enp0s8.pcap");
        assert_eq!(
            job.txt_path(),
            PathBuf::from("dmptcp---dynamic2----AP1---trace-enp0s8.txt")
        );
        assert_eq!(job.status, CaptureStatus::Pending);
    }

    #[test]
    fn missing_capture() {
        let dir = scratch_dir("missing");
        let pcap = dir.join("absent.pcap");
        let jobs = CaptureConverter::default().convert_all([&pcap]);
        assert_eq!(jobs[0].status, CaptureStatus::Missing);
        assert!(!dir.join("absent.txt").exists());
    }

    #[test]
    fn successful_conversion() {
        let dir = scratch_dir("success");
        let pcap = dir.join("x.pcap");
        fs::write(&pcap, b"").unwrap();
        let jobs = CaptureConverter::new("true").convert_all([&pcap]);
        assert_eq!(jobs[0].status, CaptureStatus::Converted(dir.join("x.txt")));
        assert_eq!(jobs[0].status, CaptureStatus::Converted(jobs[0].txt_path()));
        assert!(dir.join("x.txt").exists());
    }

    #[test]
    fn failing_tool_does_not_abort_batch() {
        let dir = scratch_dir("failing");
        let first = dir.join("first.pcap");
        let second = dir.join("second.pcap");
        fs::write(&first, b"").unwrap();
        let jobs = CaptureConverter::new("false").convert_all([&first, &second]);
        assert!(matches!(jobs[0].status, CaptureStatus::Failed(_)));
        assert_eq!(jobs[1].status, CaptureStatus::Missing);
        assert_eq!(
            ConversionSummary::from_jobs(&jobs),
            ConversionSummary {
                converted: 0,
                missing: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn tool_not_installed() {
        let dir = scratch_dir("no-tool");
        let pcaps = [dir.join("a.pcap"), dir.join("b.pcap")];
        for p in &pcaps {
            fs::write(p, b"").unwrap();
        }
        let converter = CaptureConverter::new("mpeval-no-such-converter");
        assert!(matches!(
            converter.convert(&pcaps[0]),
            Err(ConvertError::ToolNotFound(_))
        ));
        let jobs = converter.convert_all(&pcaps);
        assert!(jobs
            .iter()
            .all(|j| matches!(j.status, CaptureStatus::Failed(_))));
    }

    #[test]
    fn natural_capture_order() {
        let dir = scratch_dir("glob");
        for name in ["adhoc10", "adhoc2", "adhoc1"] {
            fs::write(dir.join(format!("tcp---static----{name}---trace-enp0s3.pcap")), b"").unwrap();
        }
        fs::write(dir.join("notes.txt"), b"").unwrap();
        let pattern = format!("{}/*.pcap", dir.display());
        let names = find_captures(&pattern)
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect_vec();
        assert_eq!(
            names,
            vec![
                "tcp---static----adhoc1---trace-enp0s3.pcap",
                "tcp---static----adhoc2---trace-enp0s3.pcap",
                "tcp---static----adhoc10---trace-enp0s3.pcap",
            ]
        );
    }
}
