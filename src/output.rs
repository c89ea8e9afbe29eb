use crate::study::DeltaNRow;
use active_matter_common::Snapshot;
use anyhow::Result;
use std::io::{Read, Write};

/// Encodings accepted for the snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Bincode,
    MessagePack,
}

impl SnapshotFormat {
    /// Unknown names fall back to JSON.
    pub fn from_name(name: &str) -> Self {
        match name {
            "bincode" => SnapshotFormat::Bincode,
            "messagepack" => SnapshotFormat::MessagePack,
            _ => SnapshotFormat::Json,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SnapshotFormat::Json => "json",
            SnapshotFormat::Bincode => "bin",
            SnapshotFormat::MessagePack => "msgpack",
        }
    }
}

pub fn write_snapshots<W: Write>(mut writer: W, snapshots: &[Snapshot], format: SnapshotFormat) -> Result<()> {
    match format {
        SnapshotFormat::Json => serde_json::to_writer(&mut writer, snapshots)?,
        SnapshotFormat::Bincode => bincode::serialize_into(&mut writer, snapshots)?,
        SnapshotFormat::MessagePack => rmp_serde::encode::write(&mut writer, snapshots)?,
    }
    writer.flush()?;
    Ok(())
}

pub fn read_snapshots<R: Read>(reader: R, format: SnapshotFormat) -> Result<Vec<Snapshot>> {
    let snapshots = match format {
        SnapshotFormat::Json => serde_json::from_reader(reader)?,
        SnapshotFormat::Bincode => bincode::deserialize_from(reader)?,
        SnapshotFormat::MessagePack => rmp_serde::from_read(reader)?,
    };
    Ok(snapshots)
}

/// Writes the ΔN-vs-N table as CSV with log10 columns for plotting.
pub fn write_delta_n_table<W: Write>(writer: W, table: &[DeltaNRow]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(["packing_fraction", "target_occupancy", "mean", "stdev", "log10_mean", "log10_stdev"])?;
    for row in table {
        writer.write_record(&[
            format!("{:.6}", row.packing_fraction),
            format!("{}", row.target_occupancy),
            format!("{:.6}", row.mean),
            format!("{:.6}", row.stdev),
            format!("{:.6}", row.log10_mean()),
            format!("{:.6}", row.log10_stdev()),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
