use super::RunSummary;
use anyhow::Result;
use csv::{Writer, WriterBuilder};
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Appends run summaries to a CSV file, writing the header only once.
pub struct SummaryLogger {
    writer: Writer<File>,
}

impl SummaryLogger {
    /// Keep the rows already in `path`; headers only when the file is new or empty.
    pub fn append(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let fresh = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = WriterBuilder::new().has_headers(fresh).from_writer(file);
        Ok(Self { writer })
    }

    pub fn log(&mut self, summary: &RunSummary) -> Result<()> {
        self.writer.serialize(summary)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn log_batch(&mut self, summaries: &[RunSummary]) -> Result<()> {
        for summary in summaries {
            self.writer.serialize(summary)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_writes_header_once() {
        let path = std::env::temp_dir().join(format!("v2xmeter_summary_{}.csv", std::process::id()));
        std::fs::remove_file(&path).ok();

        let run = RunSummary {
            label: "a".into(),
            policy: "adaptive".into(),
            avg_prr: 0.5,
            ..Default::default()
        };
        SummaryLogger::append(&path).unwrap().log(&run).unwrap();
        SummaryLogger::append(&path).unwrap().log_batch(&[run.clone(), run]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("label,policy,"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("label")).count(), 1);
    }
}
