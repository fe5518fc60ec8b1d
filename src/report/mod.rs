pub use crate::error::Error;
pub use crate::session::TrainingSession;
pub use crate::strategy::HistoryEntry;

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

/// Writing this worker's per-camera strategy history, keyed by world size and
/// rank: `strategy_history_ws={W}_rk={r}.json`.
///
/// The report is a diagnostic artifact, not required to resume a run.
pub fn write_strategy_history(
    session: &TrainingSession,
    directory: &Path,
) -> Result<PathBuf, Error> {
    // Deterministic key order, so reports diff cleanly between workers.
    let mut report = BTreeMap::<u32, Vec<HistoryEntry>>::new();
    for entry in session.histories.iter() {
        report.insert(*entry.key(), entry.value().to_report().to_vec());
    }

    fs::create_dir_all(directory)?;
    let path = directory.join(format!(
        "strategy_history_ws={}_rk={}.json",
        session.world_size(),
        session.rank(),
    ));
    fs::write(&path, serde_json::to_string(&report)?)?;

    log::info!(
        target: "gausplat::distributor::report",
        "strategy history written to {path:?}",
    );

    Ok(path)
}

/// Writing this worker's per-gaussian send-count telemetry:
/// `send_counts_ws={W}_rk={r}.json`.
pub fn write_send_counts(
    world_size: usize,
    rank: usize,
    send_counts: &[Vec<i64>],
    directory: &Path,
) -> Result<PathBuf, Error> {
    fs::create_dir_all(directory)?;
    let path = directory
        .join(format!("send_counts_ws={world_size}_rk={rank}.json"));
    fs::write(&path, serde_json::to_string(send_counts)?)?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::session::TrainingSessionConfig;
    use crate::sync::SingleProcess;

    #[test]
    fn strategy_history_file_name_and_round_trip() {
        let directory = std::env::temp_dir()
            .join("gausplat-distributor")
            .join("report-history");
        let _ = fs::remove_dir_all(&directory);

        let session = TrainingSessionConfig::default()
            .init(Box::new(SingleProcess))
            .unwrap();
        let camera = Camera {
            camera_id: 2,
            image_height: 32,
            image_width: 32,
        };
        let strategy = session.start_strategy(&camera, 1).unwrap();
        session.finish_strategy(strategy).unwrap();

        let path = write_strategy_history(&session, &directory).unwrap();
        assert!(path.ends_with("strategy_history_ws=1_rk=0.json"));

        let encoded = fs::read_to_string(&path).unwrap();
        let decoded: BTreeMap<u32, Vec<HistoryEntry>> =
            serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[&2].len(), 1);
        assert_eq!(decoded[&2][0].boundaries, vec![0, 4]);
    }

    #[test]
    fn send_counts_file_name() {
        let directory = std::env::temp_dir()
            .join("gausplat-distributor")
            .join("report-sends");
        let _ = fs::remove_dir_all(&directory);

        let counts = vec![vec![0, 3], vec![1, 0]];
        let path =
            write_send_counts(2, 1, &counts, &directory).unwrap();
        assert!(path.ends_with("send_counts_ws=2_rk=1.json"));

        let encoded = fs::read_to_string(&path).unwrap();
        let decoded: Vec<Vec<i64>> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, counts);
    }
}
