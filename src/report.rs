use std::{
    collections::BTreeMap,
    fs::{create_dir_all, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use plotters::prelude::*;
use polars::prelude::{df, DataFrame, NamedFrom, ParquetWriter};

use crate::metrics::ClassificationScore;

/// Test scores per label ratio at every evaluated epoch.
#[derive(Clone, Debug, Default)]
pub struct PerformanceHistory {
    records: BTreeMap<u32, Vec<(usize, ClassificationScore)>>,
}

impl PerformanceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, epoch: usize, ratio: u32, score: ClassificationScore) {
        self.records.entry(ratio).or_default().push((epoch, score));
    }

    pub fn ratios(&self) -> impl Iterator<Item = u32> + '_ {
        self.records.keys().copied()
    }

    pub fn get(&self, ratio: u32) -> &[(usize, ClassificationScore)] {
        self.records.get(&ratio).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.values().all(Vec::is_empty)
    }

    /// Entry with the highest accuracy for `ratio`.
    pub fn best(&self, ratio: u32) -> Option<(usize, ClassificationScore)> {
        self.get(ratio)
            .iter()
            .copied()
            .max_by(|a, b| a.1.accuracy.total_cmp(&b.1.accuracy))
    }

    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut epoch = Vec::new();
        let mut ratio = Vec::new();
        let mut accuracy = Vec::new();
        let mut macro_f1 = Vec::new();
        let mut micro_f1 = Vec::new();
        for (&r, rows) in &self.records {
            for (e, s) in rows {
                epoch.push(*e as u32);
                ratio.push(r);
                accuracy.push(s.accuracy);
                macro_f1.push(s.macro_f1);
                micro_f1.push(s.micro_f1);
            }
        }
        Ok(df! {
            "epoch" => epoch,
            "label_ratio" => ratio,
            "accuracy" => accuracy,
            "macro_f1" => macro_f1,
            "micro_f1" => micro_f1,
        }?)
    }

    pub fn write_parquet<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            create_dir_all(parent)?;
        }
        let mut df = self.to_dataframe()?;
        ParquetWriter::new(File::create(path)?).finish(&mut df)?;
        Ok(())
    }

    /// One panel per label ratio with accuracy, macro-F1 and micro-F1 against
    /// the epoch. Captions, axis labels and legends need the `ttf` feature.
    pub fn plot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        let ratios: Vec<u32> = self.ratios().collect();
        if ratios.is_empty() {
            return Err(anyhow!("nothing to plot"));
        }
        let root = BitMapBackend::new(path, (500 * ratios.len() as u32, 500)).into_drawing_area();
        root.fill(&WHITE).map_err(|e| anyhow!("backend error: {e}"))?;
        let panels = root.split_evenly((1, ratios.len()));

        for (panel, ratio) in panels.iter().zip(ratios) {
            let rows = self.get(ratio);
            let first = rows.first().map(|r| r.0 as f64).unwrap_or(0.0);
            let last = rows.last().map(|r| r.0 as f64).unwrap_or(0.0).max(first + 1.0);
            let mut builder = ChartBuilder::on(panel);
            builder.margin(10);
            #[cfg(feature = "ttf")]
            builder
                .caption(format!("Label Rate {ratio}%"), ("sans-serif", 20))
                .x_label_area_size(35)
                .y_label_area_size(45);
            let mut chart = builder
                .build_cartesian_2d(first..last, 0f64..1f64)
                .map_err(|e| anyhow!("chart build error: {e}"))?;
            let mut mesh = chart.configure_mesh();
            if cfg!(feature = "ttf") {
                mesh.x_desc("epoch");
            } else {
                mesh.x_labels(0).y_labels(0);
            }
            mesh.draw().map_err(|e| anyhow!("mesh error: {e}"))?;

            let series: [(&str, RGBColor, fn(&ClassificationScore) -> f64); 3] = [
                ("Acc", RED, |s| s.accuracy),
                ("Macro-F1", BLUE, |s| s.macro_f1),
                ("Micro-F1", GREEN, |s| s.micro_f1),
            ];
            for (name, color, value) in series {
                chart
                    .draw_series(LineSeries::new(
                        rows.iter().map(|(e, s)| (*e as f64, value(s))),
                        color,
                    ))
                    .map_err(|e| anyhow!("series error: {e}"))?
                    .label(name)
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
            }
            #[cfg(feature = "ttf")]
            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()
                .map_err(|e| anyhow!("legend error: {e}"))?;
        }
        root.present().map_err(|e| anyhow!("failed to write {}: {e}", path.display()))?;
        Ok(())
    }
}

/// Plain-text evaluation log appended to after every evaluation.
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn create<P: AsRef<Path>>(dir: P, stem: &str) -> Result<Self> {
        create_dir_all(dir.as_ref())?;
        Ok(Self {
            path: dir.as_ref().join(format!("{stem}.txt")),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_epoch(&self, epoch: usize, scores: &[(u32, ClassificationScore)]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "Epoches:{epoch}-----------------------------------")?;
        for (ratio, score) in scores {
            writeln!(file, "\t Label Rate:{ratio}% [{score} ]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::{ParquetReader, SerReader};

    fn score(accuracy: f64) -> ClassificationScore {
        ClassificationScore {
            accuracy,
            micro_f1: accuracy,
            macro_f1: accuracy - 0.1,
        }
    }

    fn history() -> PerformanceHistory {
        let mut history = PerformanceHistory::new();
        for (epoch, acc) in [(19, 0.5), (39, 0.7), (59, 0.6)] {
            history.record(epoch, 20, score(acc));
            history.record(epoch, 40, score(acc + 0.1));
        }
        history
    }

    #[test]
    fn best_entry_per_ratio() {
        let history = history();
        assert_eq!(history.ratios().collect::<Vec<_>>(), vec![20, 40]);
        assert_eq!(history.best(20).map(|b| b.0), Some(39));
        assert!(history.best(60).is_none());
        assert!(history.get(60).is_empty());
        assert!(PerformanceHistory::new().is_empty());
    }

    #[test]
    fn parquet_export() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("runs").join("history.parquet");
        history().write_parquet(&path)?;
        let df = ParquetReader::new(File::open(&path)?).finish()?;
        assert_eq!(df.shape(), (6, 5));
        assert_eq!(
            df.get_column_names(),
            vec!["epoch", "label_ratio", "accuracy", "macro_f1", "micro_f1"]
        );
        Ok(())
    }

    #[test]
    fn plot_writes_png() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("img").join("run.png");
        history().plot(&path)?;
        assert!(path.metadata()?.len() > 0);
        assert!(PerformanceHistory::new().plot(dir.path().join("empty.png")).is_err());
        Ok(())
    }

    #[test]
    fn run_log_appends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log = RunLog::create(dir.path(), "HAN+HAN_acm_[now]")?;
        log.write_epoch(19, &[(20, score(0.5)), (40, score(0.6))])?;
        log.write_epoch(39, &[(20, score(0.7))])?;
        let text = std::fs::read_to_string(log.path())?;
        assert_eq!(text.matches("Epoches:").count(), 2);
        assert!(text
            .contains("\t Label Rate:40% [Accuracy:0.6000 Macro-F1:0.5000 Micro-F1:0.6000 ]"));
        Ok(())
    }
}
