//! Pipeline orchestration
//!
//! This module provides the public API for processing robot log folders.
//! One `BotProcessor` session owns the three append-mode output files and one
//! `StreamRouter`, so classification state spans every input file of the bot.

use crate::config::{DataLayout, ParserConfig};
use crate::discovery::{find_log_files, resolve_bots};
use crate::error::CanParseError;
use crate::router::{OutputStreams, StreamRouter};
use crate::types::{BotReport, BotStatus, FileStats, RunReport};
use crate::{PRODUCER_NAME, VERSION};
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Process every requested bot in order.
///
/// A bot whose session fails is reported as `failed`; the remaining bots
/// still run.
///
/// # Arguments
/// * `bots` - Bot names; `*` selects every directory below `input/`
/// * `layout` - Data directory layout
/// * `config` - Parser settings
///
/// # Example
/// ```ignore
/// let layout = DataLayout::new("/var/lib/canparser");
/// let report = process_bots(&["bot7".to_string()], &layout, &ParserConfig::default())?;
/// ```
pub fn process_bots(
    bots: &[String],
    layout: &DataLayout,
    config: &ParserConfig,
) -> Result<RunReport, CanParseError> {
    let started_at = Utc::now();
    let bots = resolve_bots(bots, &layout.input_dir())?;
    info!(?bots, "processing bots");

    let mut reports = Vec::with_capacity(bots.len());
    for bot in &bots {
        let report = match BotProcessor::new(bot, layout, config).process() {
            Ok(report) => report,
            Err(e) => {
                error!(bot = %bot, error = %e, "bot processing failed");
                BotReport::failed(bot, &e)
            }
        };
        reports.push(report);
    }

    Ok(RunReport {
        run_id: Uuid::new_v4(),
        producer: PRODUCER_NAME.to_string(),
        version: VERSION.to_string(),
        started_at,
        finished_at: Utc::now(),
        bots: reports,
    })
}

/// Processing session of a single bot
pub struct BotProcessor<'a> {
    bot: String,
    layout: &'a DataLayout,
    config: &'a ParserConfig,
}

impl<'a> BotProcessor<'a> {
    pub fn new(bot: impl Into<String>, layout: &'a DataLayout, config: &'a ParserConfig) -> Self {
        Self {
            bot: bot.into(),
            layout,
            config,
        }
    }

    /// Parse every log file of the bot into its three output streams.
    ///
    /// A missing or empty bot directory is reported, not raised.
    pub fn process(&self) -> Result<BotReport, CanParseError> {
        info!(bot = %self.bot, "parsing robot");

        let bot_dir = self.layout.bot_input_dir(&self.bot);
        if !bot_dir.is_dir() {
            warn!(bot = %self.bot, dir = %bot_dir.display(), "input directory for bot doesn't exist");
            return Ok(BotReport::empty(&self.bot, BotStatus::MissingInput));
        }

        let files = find_log_files(&bot_dir, &self.config.input_extension)?;
        if files.is_empty() {
            warn!(bot = %self.bot, "folder for bot contains no log files");
            return Ok(BotReport::empty(&self.bot, BotStatus::NoLogFiles));
        }

        let output_dir = self.layout.bot_output_dir(&self.bot);
        if !output_dir.exists() {
            info!(bot = %self.bot, dir = %output_dir.display(), "creating output dir");
            fs::create_dir_all(&output_dir)?;
        }

        let paths = self.layout.bot_outputs(&self.bot);
        let mut out = OutputStreams {
            heartbeats: open_append(&paths.heartbeats)?,
            transactions: open_append(&paths.transactions)?,
            timestamped: open_append(&paths.timestamped)?,
        };
        let mut router = StreamRouter::new(self.config.columns.clone());
        let mut file_reports = Vec::with_capacity(files.len());

        for file in files {
            info!(file = %file.display(), "parsing");
            let mut stats = FileStats {
                file: file.clone(),
                ..Default::default()
            };

            let reader = BufReader::new(File::open(&file)?);
            router.route_file(reader, &mut out, &mut stats)?;
            out.flush()?;

            info!(
                file = %file.display(),
                processed = stats.processed,
                skipped = stats.skipped + stats.dropped,
                "finished processing"
            );

            if self.config.delete_input_files {
                info!(file = %file.display(), "deleting");
                fs::remove_file(&file)?;
            }
            file_reports.push(stats);
        }

        let heartbeats = router.heartbeat_summary();
        for summary in heartbeats.iter().filter(|s| s.failures > 0) {
            info!(
                bot = %self.bot,
                id = %summary.id,
                failures = summary.failures,
                min_failure_latency_s = summary.min_failure_latency_s,
                "heartbeat failures"
            );
        }

        Ok(BotReport {
            bot: self.bot.clone(),
            status: BotStatus::Processed,
            files: file_reports,
            heartbeats,
            transactions: router.transaction_summary(),
            error: None,
        })
    }
}

fn open_append(path: &Path) -> Result<BufWriter<File>, CanParseError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CobId;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const HEADER: &str = "TimestampEpoch;BusChannel;ID;IDE;DLC;DataLength;Dir;EDL;BRS;DataBytes";

    fn data_dir() -> (TempDir, DataLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        fs::create_dir_all(layout.input_dir()).unwrap();
        (dir, layout)
    }

    fn write_log(layout: &DataLayout, bot: &str, name: &str, body: &[&str]) {
        let dir = layout.bot_input_dir(bot).join("00000001");
        fs::create_dir_all(&dir).unwrap();
        let mut content = format!("{}\n", HEADER);
        for line in body {
            content.push_str(line);
            content.push('\n');
        }
        fs::write(dir.join(name), content).unwrap();
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_two_files_share_session() {
        let (_dir, layout) = data_dir();
        write_log(
            &layout,
            "bot1",
            "00000001.csv",
            &[
                "1699999999.000000;1;80;0;0;0;0;0;0;",
                "1699999999.000000;1;5BB;0;8;8;0;0;0;4B02000001000000",
            ],
        );
        write_log(
            &layout,
            "bot1",
            "00000002.csv",
            &[
                "1699999999.020000;1;80;0;0;0;0;0;0;",
                "1699999999.050000;1;63B;0;8;8;0;0;0;4002000000000000",
                "1699999999.060000;1;185;0;0;0;0;0;0;",
            ],
        );

        let report = BotProcessor::new("bot1", &layout, &ParserConfig::default())
            .process()
            .unwrap();
        let outputs = layout.bot_outputs("bot1");

        assert_eq!(
            read_lines(&outputs.heartbeats),
            vec![
                HEADER.to_string(),
                "2023-11-14 22:13:19.000000;1;80;0;0;0;0;0;0;".to_string(),
                "2023-11-14 22:13:19.020000;1;80;0;0;0;0;0;0;\t(0.020000) - FAILURE".to_string(),
            ]
        );
        assert_eq!(
            read_lines(&outputs.transactions)[1],
            "2023-11-14 22:13:19.050000;1;63B;0;8;8;0;0;0;4002000000000000\t(0.050000)"
        );
        assert_eq!(read_lines(&outputs.timestamped).len(), 5);

        assert_eq!(report.status, BotStatus::Processed);
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.files[1].processed, 3);
        assert_eq!(report.heartbeats[0].id, CobId(0x80));
        assert_eq!(report.heartbeats[0].failures, 1);
        assert_eq!(report.transactions.pairs, 1);
    }

    #[test]
    fn test_outputs_are_appended() {
        let (_dir, layout) = data_dir();
        write_log(&layout, "bot1", "a.csv", &["1699999999.000000;1;185;0;0;0;0;0;0;"]);
        let config = ParserConfig::default();

        BotProcessor::new("bot1", &layout, &config).process().unwrap();
        BotProcessor::new("bot1", &layout, &config).process().unwrap();

        let timestamped = read_lines(&layout.bot_outputs("bot1").timestamped);
        assert_eq!(timestamped.len(), 2);
    }

    #[test]
    fn test_delete_input_files() {
        let (_dir, layout) = data_dir();
        write_log(&layout, "bot1", "a.csv", &["1699999999.000000;1;185;0;0;0;0;0;0;"]);
        let config = ParserConfig {
            delete_input_files: true,
            ..Default::default()
        };

        let report = BotProcessor::new("bot1", &layout, &config).process().unwrap();

        assert!(!report.files[0].file.exists());
        assert!(layout.bot_outputs("bot1").timestamped.exists());
    }

    #[test]
    fn test_missing_and_empty_bots_are_reported() {
        let (_dir, layout) = data_dir();
        fs::create_dir_all(layout.bot_input_dir("empty")).unwrap();
        let config = ParserConfig::default();

        let missing = BotProcessor::new("ghost", &layout, &config).process().unwrap();
        assert_eq!(missing.status, BotStatus::MissingInput);

        let empty = BotProcessor::new("empty", &layout, &config).process().unwrap();
        assert_eq!(empty.status, BotStatus::NoLogFiles);
        assert!(!layout.bot_output_dir("empty").exists());
    }

    #[test]
    fn test_process_bots_wildcard() {
        let (_dir, layout) = data_dir();
        write_log(&layout, "bot1", "a.csv", &["1699999999.000000;1;80;0;0;0;0;0;0;"]);
        write_log(&layout, "bot2", "a.csv", &["1699999999.000000;1;80;0;0;0;0;0;0;"]);

        let report =
            process_bots(&["*".to_string()], &layout, &ParserConfig::default()).unwrap();

        let bots: Vec<&str> = report.bots.iter().map(|b| b.bot.as_str()).collect();
        assert_eq!(bots, vec!["bot1", "bot2"]);
        assert_eq!(report.producer, PRODUCER_NAME);
        assert!(report.finished_at >= report.started_at);

        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["bots"][0]["status"], "processed");
        assert_eq!(json["bots"][0]["heartbeats"][0]["id"], "0x80");
    }

    #[test]
    fn test_failed_bot_does_not_stop_others() {
        let (_dir, layout) = data_dir();
        let broken = layout.bot_input_dir("bot1").join("00000001");
        fs::create_dir_all(&broken).unwrap();
        fs::write(
            broken.join("a.csv"),
            "TimestampEpoch;Identifier;DataBytes\n1699999999.000000;80;\n",
        )
        .unwrap();
        write_log(&layout, "bot2", "a.csv", &["1699999999.000000;1;80;0;0;0;0;0;0;"]);

        let report =
            process_bots(&["*".to_string()], &layout, &ParserConfig::default()).unwrap();

        assert_eq!(report.bots[0].status, BotStatus::Failed);
        assert!(report.bots[0].error.as_deref().unwrap().contains("ID"));
        assert_eq!(report.bots[1].status, BotStatus::Processed);
        assert_eq!(read_lines(&layout.bot_outputs("bot2").heartbeats).len(), 2);

        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["bots"][0]["status"], "failed");
        assert!(json["bots"][1].get("error").is_none());
    }

    #[test]
    fn test_corrupt_line_keeps_file_going() {
        let (_dir, layout) = data_dir();
        write_log(
            &layout,
            "bot1",
            "a.csv",
            &["1699999999.000000;1;80;0;0;0;0;0;0;"],
        );
        let path = layout.bot_input_dir("bot1").join("00000001").join("a.csv");
        let mut content = fs::read(&path).unwrap();
        content.extend_from_slice(b"1699999999.01\xff0000;1;80;0;0;0;0;0;0;\n");
        content.extend_from_slice(b"1699999999.020000;1;80;0;0;0;0;0;0;\n");
        fs::write(&path, content).unwrap();

        let report = BotProcessor::new("bot1", &layout, &ParserConfig::default())
            .process()
            .unwrap();

        assert_eq!(report.files[0].processed, 3);
        assert_eq!(report.files[0].skipped, 1);
        assert_eq!(read_lines(&layout.bot_outputs("bot1").timestamped).len(), 2);
    }
}
