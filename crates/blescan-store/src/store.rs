//! Shard store implementation.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use time::{Date, OffsetDateTime};
use tracing::{debug, info, warn};

use blescan_types::DataKind;

use crate::error::{Error, Result};
use crate::rows::Row;
use crate::schema;

/// Appends rows to ten-minute shard files under one storage location.
///
/// Several stores can point at different media (SD card, USB stick) and be
/// written with the same rows.
#[derive(Debug)]
pub struct ShardStore {
    base_dir: PathBuf,
    device_id: u32,
    date: Date,
    today_dir: PathBuf,
}

/// Outcome of [`reconstruct_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstructReport {
    /// Shard directories merged and removed.
    pub days: usize,
    /// Daily files written.
    pub files: usize,
}

impl ShardStore {
    /// Open a store rooted at `base_dir`, creating today's directory.
    pub fn open<P: AsRef<Path>>(base_dir: P, device_id: u32) -> Result<Self> {
        Self::open_at(base_dir, device_id, now_local())
    }

    /// Open a store as if the current time were `now`.
    pub fn open_at<P: AsRef<Path>>(base_dir: P, device_id: u32, now: OffsetDateTime) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let date = now.date();
        let today_dir = base_dir.join(schema::day_dir_name(device_id, date));
        create_dir(&today_dir)?;
        info!("Storing shards in {}", today_dir.display());

        Ok(Self {
            base_dir,
            device_id,
            date,
            today_dir,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory holding today's shards.
    pub fn today_dir(&self) -> &Path {
        &self.today_dir
    }

    /// Append a row to the current shard of its kind.
    pub fn save_row(&mut self, row: &Row) -> Result<()> {
        self.save_row_at(row, now_local())
    }

    /// Append a row as if the current time were `now`.
    pub fn save_row_at(&mut self, row: &Row, now: OffsetDateTime) -> Result<()> {
        if now.date() != self.date {
            self.roll_day(now.date())?;
        }

        let path = self.shard_path(row.kind, now);
        // The directory may have been removed underneath us (medium swapped).
        if !self.today_dir.exists() {
            create_dir(&self.today_dir)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| Error::Write {
                path: path.clone(),
                source,
            })?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(&row.fields)?;
        writer.flush()?;
        Ok(())
    }

    /// Path of the shard `now` falls into.
    pub fn shard_path(&self, kind: DataKind, now: OffsetDateTime) -> PathBuf {
        let minute = schema::shard_minute(now.minute());
        self.today_dir
            .join(schema::shard_file_name(now.hour(), minute, kind))
    }

    fn roll_day(&mut self, date: Date) -> Result<()> {
        let today_dir = self
            .base_dir
            .join(schema::day_dir_name(self.device_id, date));
        create_dir(&today_dir)?;
        debug!("New day, storing shards in {}", today_dir.display());
        self.date = date;
        self.today_dir = today_dir;
        Ok(())
    }
}

/// Merge the shard directories of past days into daily files.
///
/// Runs once at startup per storage location. Today's directory is left
/// alone. After a day is merged its shard directory is deleted, so running
/// this again is a no-op for that day.
pub fn reconstruct_files<P: AsRef<Path>>(base_dir: P) -> Result<ReconstructReport> {
    reconstruct_files_on(base_dir, now_local().date())
}

/// [`reconstruct_files`] with an explicit notion of today.
pub fn reconstruct_files_on<P: AsRef<Path>>(base_dir: P, today: Date) -> Result<ReconstructReport> {
    let base_dir = base_dir.as_ref();
    let mut report = ReconstructReport::default();

    let entries = match fs::read_dir(base_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e.into()),
    };

    let mut day_dirs = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        match schema::parse_day_dir(&name) {
            Some(date) if date != today => day_dirs.push(name),
            _ => {}
        }
    }
    day_dirs.sort();

    for name in day_dirs {
        let dir = base_dir.join(&name);
        for kind in DataKind::ALL {
            if merge_kind(base_dir, &dir, &name, kind)? {
                report.files += 1;
            }
        }
        fs::remove_dir_all(&dir)?;
        report.days += 1;
        info!("Reconstructed daily files for {}", name);
    }

    Ok(report)
}

/// Concatenate every shard of one kind into the daily file.
///
/// Returns whether a daily file was written.
fn merge_kind(base_dir: &Path, dir: &Path, name: &str, kind: DataKind) -> Result<bool> {
    let shards: Vec<PathBuf> = schema::shard_file_names(kind)
        .map(|file| dir.join(file))
        .filter(|path| path.is_file())
        .collect();
    if shards.is_empty() {
        return Ok(false);
    }

    let target = base_dir.join(schema::daily_file_name(name, kind));
    if target.exists() {
        warn!("Overwriting existing daily file {}", target.display());
    }
    let mut out = File::create(&target).map_err(|source| Error::Write {
        path: target.clone(),
        source,
    })?;

    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut out);
        writer.write_record(kind.header())?;
        writer.flush()?;
    }

    for shard in &shards {
        let mut input = File::open(shard)?;
        io::copy(&mut input, &mut out)?;
    }
    out.sync_all()?;

    debug!("Merged {} shard(s) into {}", shards.len(), target.display());
    Ok(true)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| Error::CreateDirectory {
        path: path.to_path_buf(),
        source,
    })
}

fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
