use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::processing::snapshot::Snapshot;

/// Write column data to a CSV file with headers.
pub fn write_csv<P: AsRef<Path>>(path: P, headers: &[String], data: &[Vec<f64>]) -> io::Result<()> {
    if !headers.is_empty() && !data.is_empty() && headers.len() != data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Headers count ({}) doesn't match data columns ({})",
                headers.len(),
                data.len()
            ),
        ));
    }

    let mut file = File::create(path)?;
    writeln!(file, "{}", headers.join(","))?;

    let n_rows = data.iter().map(|col| col.len()).max().unwrap_or(0);
    for i in 0..n_rows {
        let row: Vec<String> = data
            .iter()
            .map(|col| col.get(i).map(|v| format!("{v:.15e}")).unwrap_or_default())
            .collect();
        writeln!(file, "{}", row.join(","))?;
    }
    Ok(())
}

/// Radial profiles of a fluid unknown: `r` followed by one column per saved time.
pub fn write_profile_history<P: AsRef<Path>>(path: P, snapshot: &Snapshot, unknown: &str) -> io::Result<()> {
    let missing = |what: &str| io::Error::new(io::ErrorKind::NotFound, format!("no {what} in snapshot"));
    let q = snapshot.unknown(unknown).ok_or_else(|| missing(unknown))?;
    let grid = snapshot.grid(&q.grid).ok_or_else(|| missing(&q.grid))?;
    if q.multiplicity != 1 || grid.n_cells != grid.r.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{unknown}' is not a radial profile"),
        ));
    }

    let mut headers = vec!["r".to_string()];
    let mut data = vec![grid.r.clone()];
    for (t, values) in snapshot.times.iter().zip(&q.history) {
        headers.push(format!("t={t:.6e}"));
        data.push(values.clone());
    }
    write_csv(path, &headers, &data)
}

/// Time trace of every scalar unknown.
pub fn write_scalar_traces<P: AsRef<Path>>(path: P, snapshot: &Snapshot) -> io::Result<()> {
    let mut headers = vec!["t".to_string()];
    let mut data = vec![snapshot.times.clone()];
    for q in snapshot.unknowns.iter().filter(|q| q.grid == "scalar") {
        for shard in 0..q.multiplicity {
            headers.push(if q.multiplicity == 1 {
                q.name.clone()
            } else {
                format!("{}[{shard}]", q.name)
            });
            data.push(q.history.iter().map(|v| v[shard]).collect());
        }
    }
    write_csv(path, &headers, &data)
}
