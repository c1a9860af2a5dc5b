/*!
Writing posterior draws to disk. Enable via the `csv` feature.
*/

use std::path::Path;

use csv::Writer;

use crate::error::Result;
use crate::sink::Draw;

fn vector_columns(prefix: &str, len: usize) -> impl Iterator<Item = String> + '_ {
    (0..len).map(move |i| format!("{prefix}_{i}"))
}

/**
Saves the scalar and vector parameters of `draws` as CSV, one row per draw.

Columns are `draw`, `phi`, `sigma2`, then `mu_j`, `tau2_j`, `xi_b` and `x_i` (missing
covariates in original units). Matrix-valued parameters are not written. An empty slice
produces a file with the `draw,phi,sigma2` header only.

# Examples

```rust
use mvgp_mcmc::io::save_csv;

let path = std::env::temp_dir().join("mvgp_draws_doc.csv");
save_csv(&[], &path).expect("Expecting saving an empty run to succeed");
```
*/
pub fn save_csv<P: AsRef<Path>>(draws: &[Draw], path: P) -> Result<()> {
    let mut wtr = Writer::from_path(path)?;

    let (d, b, m) = draws
        .first()
        .map_or((0, 0, 0), |draw| (draw.mu.len(), draw.xi.len(), draw.x.len()));
    let mut header = vec!["draw".to_string(), "phi".to_string(), "sigma2".to_string()];
    header.extend(vector_columns("mu", d));
    header.extend(vector_columns("tau2", d));
    header.extend(vector_columns("xi", b));
    header.extend(vector_columns("x", m));
    wtr.write_record(&header)?;

    for (idx, draw) in draws.iter().enumerate() {
        let mut row = vec![idx.to_string(), draw.phi.to_string(), draw.sigma2.to_string()];
        row.extend(draw.mu.iter().map(f64::to_string));
        row.extend(draw.tau2.iter().map(f64::to_string));
        row.extend(draw.xi.iter().map(f64::to_string));
        row.extend(draw.x.iter().map(f64::to_string));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}
