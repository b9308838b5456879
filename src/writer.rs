use crate::Display;
use anyhow::{anyhow, Result};
use hdf5::{Dataset, File, Group};
use log::{error, info};
use ndarray::{s, Array2, ArrayView1};
use std::path::Path;

/// Hdf5Writer keeps one group per channel label and appends every reduced
/// vector as a row of that group's `means` dataset.
pub struct Hdf5Writer {
    pub file: File,
    pub channels: Vec<(String, ChannelData)>,
}

impl Hdf5Writer {
    pub fn new(
        filename: impl AsRef<Path>,
        labels: &[&str],
        n_samples: usize,
        max_rows: usize,
        buffer_capacity: usize,
    ) -> Result<Self> {
        let file = File::create(filename.as_ref())?;
        let channels = labels
            .iter()
            .map(|&label| {
                let group = file.create_group(label)?;
                let data = ChannelData::new(&group, n_samples, max_rows, buffer_capacity)?;
                Ok((label.to_string(), data))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { file, channels })
    }

    /// Append one vector to the channel named `label`.
    pub fn append(&mut self, label: &str, samples: &[f64]) -> Result<()> {
        let (_, channel) = self
            .channels
            .iter_mut()
            .find(|(name, _)| name == label)
            .ok_or_else(|| anyhow!("No dataset for channel {label}"))?;
        channel.append(samples)
    }

    /// Flush any remaining buffered rows for every channel.
    pub fn flush_all(&mut self) -> Result<()> {
        for (_, channel) in &mut self.channels {
            channel.flush()?;
        }
        self.file.flush()?;
        Ok(())
    }
}

impl Display for Hdf5Writer {
    fn show(&mut self, label: &str, samples: &[f64]) {
        if let Err(e) = self.append(label, samples) {
            error!("Could not write channel {label}: {e}");
        }
    }

    fn finish(&mut self) {
        match self.flush_all() {
            Ok(()) => info!(
                "Wrote {} rows to {}",
                self.channels
                    .iter()
                    .map(|(_, c)| c.current_row)
                    .sum::<usize>(),
                self.file.filename()
            ),
            Err(e) => error!("Could not flush output file: {e}"),
        }
    }
}

/// Dataset and row buffer for one channel.
pub struct ChannelData {
    pub current_row: usize,
    pub max_rows: usize,
    pub means: Dataset,
    pub buffer_capacity: usize,
    pub buffer_count: usize,
    pub buffer: Array2<f64>,
    pub n_samples: usize,
}

impl ChannelData {
    pub fn new(
        group: &Group,
        n_samples: usize,
        max_rows: usize,
        buffer_capacity: usize,
    ) -> Result<Self> {
        let buffer_capacity = buffer_capacity.clamp(1, max_rows.max(1));
        let means = group
            .new_dataset::<f64>()
            .shape((max_rows, n_samples))
            .chunk((buffer_capacity, n_samples))
            .create("means")?;

        Ok(Self {
            current_row: 0,
            max_rows,
            means,
            buffer_capacity,
            buffer_count: 0,
            buffer: Array2::zeros((buffer_capacity, n_samples)),
            n_samples,
        })
    }

    /// Buffer a row, writing the buffer out once it is full.
    pub fn append(&mut self, samples: &[f64]) -> Result<()> {
        if samples.len() != self.n_samples {
            return Err(anyhow!(
                "Vector of {} samples does not match dataset width {}",
                samples.len(),
                self.n_samples
            ));
        }
        if self.current_row + self.buffer_count >= self.max_rows {
            return Err(anyhow!("Maximum number of rows reached"));
        }

        self.buffer
            .slice_mut(s![self.buffer_count, ..])
            .assign(&ArrayView1::from(samples));
        self.buffer_count += 1;

        if self.buffer_count == self.buffer_capacity {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buffer_count == 0 {
            return Ok(());
        }

        let rows = self.buffer.slice(s![0..self.buffer_count, ..]).to_owned();
        self.means.write_slice(
            &rows,
            (self.current_row..self.current_row + self.buffer_count, ..),
        )?;

        self.current_row += self.buffer_count;
        self.buffer_count = 0;
        Ok(())
    }
}
