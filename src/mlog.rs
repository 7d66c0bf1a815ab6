// Copyright (c) 2024-present, meta-catalog contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Append-only textual operation log and its replayer.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::schema::MeasurementSchema;

/// One parsed line of the operation log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogOperation {
    CreateTimeseries {
        path: String,
        data_type: u16,
        encoding: u16,
        compressor: u16,
        props: String,
        alias: Option<String>,
        tag_offset: i64,
    },
    DeleteTimeseries {
        path: String,
    },
    SetStorageGroup {
        path: String,
    },
    DeleteStorageGroup {
        paths: Vec<String>,
    },
    SetTtl {
        path: String,
        ttl_millis: u64,
    },
}

impl LogOperation {
    pub fn create_timeseries(path: &str, schema: &MeasurementSchema, alias: Option<&str>, tag_offset: i64) -> Self {
        Self::CreateTimeseries {
            path: path.to_string(),
            data_type: schema.data_type,
            encoding: schema.encoding,
            compressor: schema.compressor,
            props: schema.encode_props(),
            alias: alias.map(str::to_string),
            tag_offset,
        }
    }

    fn format(&self) -> String {
        match self {
            Self::CreateTimeseries {
                path,
                data_type,
                encoding,
                compressor,
                props,
                alias,
                tag_offset,
            } => format!(
                "create_timeseries,{path},{data_type},{encoding},{compressor},{props},{},{tag_offset}",
                alias.as_deref().unwrap_or("")
            ),
            Self::DeleteTimeseries { path } => format!("delete_timeseries,{path}"),
            Self::SetStorageGroup { path } => format!("set_storage_group,{path}"),
            Self::DeleteStorageGroup { paths } => format!("delete_storage_group,{}", paths.join(",")),
            Self::SetTtl { path, ttl_millis } => format!("set_ttl,{path},{ttl_millis}"),
        }
    }

    fn parse(line: &str) -> std::result::Result<Self, String> {
        let mut fields = line.split(',');
        let opcode = fields.next().ok_or("empty line")?;

        match opcode {
            "create_timeseries" => {
                let path = fields.next().ok_or("missing path")?.to_string();
                let data_type = parse_u16(fields.next().ok_or("missing data_type")?)?;
                let encoding = parse_u16(fields.next().ok_or("missing encoding")?)?;
                let compressor = parse_u16(fields.next().ok_or("missing compressor")?)?;
                let props = fields.next().ok_or("missing props")?.to_string();
                let alias = fields.next().ok_or("missing alias")?;
                let alias = if alias.is_empty() { None } else { Some(alias.to_string()) };
                let tag_offset = fields
                    .next()
                    .ok_or("missing tag_offset")?
                    .parse::<i64>()
                    .map_err(|e| e.to_string())?;

                Ok(Self::CreateTimeseries {
                    path,
                    data_type,
                    encoding,
                    compressor,
                    props,
                    alias,
                    tag_offset,
                })
            }
            "delete_timeseries" => Ok(Self::DeleteTimeseries {
                path: fields.next().ok_or("missing path")?.to_string(),
            }),
            "set_storage_group" => Ok(Self::SetStorageGroup {
                path: fields.next().ok_or("missing path")?.to_string(),
            }),
            "delete_storage_group" => {
                let paths: Vec<String> = fields.map(str::to_string).collect();
                if paths.is_empty() {
                    return Err("delete_storage_group requires at least one path".to_string());
                }
                Ok(Self::DeleteStorageGroup { paths })
            }
            "set_ttl" => {
                let path = fields.next().ok_or("missing path")?.to_string();
                let ttl_millis = fields
                    .next()
                    .ok_or("missing ttl_millis")?
                    .parse::<u64>()
                    .map_err(|e| e.to_string())?;
                Ok(Self::SetTtl { path, ttl_millis })
            }
            other => Err(format!("unrecognized opcode: {other}")),
        }
    }
}

fn parse_u16(s: &str) -> std::result::Result<u16, String> {
    s.parse::<u16>().map_err(|e| e.to_string())
}

/// Appends operations to `mlog.txt`, flushing every line before returning to
/// the caller so that a committed return-to-caller implies durability up to
/// that line.
pub struct MLogWriter {
    writer: BufWriter<File>,
}

impl MLogWriter {
    /// Opens the log for appending. Replay (see [`replay`]) must happen
    /// before this is constructed, so every line appended from here on is
    /// new, durable history.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path).map_err(|e| {
            log::error!("failed to open operation log at {path:?}: {e}");
            e
        })?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, op: &LogOperation) -> Result<()> {
        let line = op.format();

        writeln!(self.writer, "{line}").and_then(|()| self.writer.flush()).map_err(|e| {
            log::error!("failed to append operation log line {line:?}: {e}");
            e
        })?;

        Ok(())
    }
}

/// Replays every line of the log at `path`, in order, calling `apply` for
/// each successfully-parsed operation. A line that fails to parse is logged
/// at error level and skipped; replay never aborts on one bad line.
///
/// Returns `Ok(())` (with nothing applied) if the log does not exist yet —
/// this is the very first start of a fresh catalog.
pub fn replay<F: FnMut(LogOperation)>(path: &Path, mut apply: F) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;

        if line.is_empty() {
            continue;
        }

        match LogOperation::parse(&line) {
            Ok(op) => apply(op),
            Err(reason) => {
                log::error!("skipping malformed mlog line {}: {reason}", line_no + 1);
            }
        }
    }

    Ok(())
}
