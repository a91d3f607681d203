use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;

pub struct MinibatchData {
    pub input: Tensor,
    pub batch: Option<Tensor>,
}

/// `DataLoader` for minibatch learning
pub trait DataLoader {
    fn minibatch_shuffled(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData>;

    fn minibatch_ordered(
        &self,
        lb: usize,
        ub: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData>;

    fn num_data(&self) -> usize;

    fn num_minibatch(&self) -> usize;

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;
}

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` partition indexes.
///
pub struct Minibatches {
    pub samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn new(ntot: usize) -> Self {
        Self {
            samples: (0..ntot).collect(),
            chunks: vec![],
        }
    }

    pub fn shuffle_minibatch(&mut self, batch_size: usize) {
        let mut rng = rand::rng();
        self.samples.shuffle(&mut rng);
        self.chunks = self
            .samples
            .chunks(batch_size.max(1))
            .map(|c| c.to_vec())
            .collect();
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }
}

///
/// A simple data loader for in-memory 2d matrix.  Each row will be
/// considered as a feature vector. The number of samples is the
/// number of rows. An optional batch matrix is paired row by row.
///
pub struct InMemoryData {
    input_data: Tensor,
    batch_data: Option<Tensor>,
    minibatches: Minibatches,
}

impl InMemoryData {
    ///
    /// Create a data loader with the main data tensor `data` (n x d)
    ///
    pub fn new(data: &Tensor) -> anyhow::Result<Self> {
        let (nrows, _) = data.dims2()?;
        Ok(InMemoryData {
            input_data: data.to_device(&Device::Cpu)?,
            batch_data: None,
            minibatches: Minibatches::new(nrows),
        })
    }

    ///
    /// Create a data loader with the main `data` (n x d) and the
    /// batch matrix `batch` (n x b)
    ///
    pub fn new_with_batch(data: &Tensor, batch: &Tensor) -> anyhow::Result<Self> {
        let (nrows, _) = data.dims2()?;
        let (nbatch_rows, _) = batch.dims2()?;
        if nrows != nbatch_rows {
            anyhow::bail!(
                "data has {} rows but batch matrix has {} rows",
                nrows,
                nbatch_rows
            );
        }
        Ok(InMemoryData {
            input_data: data.to_device(&Device::Cpu)?,
            batch_data: Some(batch.to_device(&Device::Cpu)?),
            minibatches: Minibatches::new(nrows),
        })
    }

    fn take_rows(
        &self,
        rows: &[usize],
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData> {
        let idx = rows.iter().map(|&i| i as u32).collect::<Vec<_>>();
        let idx = Tensor::from_vec(idx, rows.len(), &Device::Cpu)?;

        let input = self
            .input_data
            .index_select(&idx, 0)?
            .to_device(target_device)?;

        let batch = match &self.batch_data {
            Some(b) => Some(b.index_select(&idx, 0)?.to_device(target_device)?),
            None => None,
        };

        Ok(MinibatchData { input, batch })
    }
}

impl DataLoader for InMemoryData {
    fn minibatch_shuffled(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData> {
        let rows = self.minibatches.chunks.get(batch_idx).ok_or_else(|| {
            anyhow::anyhow!(
                "minibatch #{} not available; call `shuffle_minibatch` first ({} chunks)",
                batch_idx,
                self.minibatches.chunks.len()
            )
        })?;
        self.take_rows(rows, target_device)
    }

    fn minibatch_ordered(
        &self,
        lb: usize,
        ub: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData> {
        if lb > ub || ub > self.num_data() {
            anyhow::bail!("check lb {}, ub {} vs. ntot {}", lb, ub, self.num_data());
        }
        let rows = (lb..ub).collect::<Vec<_>>();
        self.take_rows(&rows, target_device)
    }

    fn num_data(&self) -> usize {
        self.minibatches.size()
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        self.minibatches.shuffle_minibatch(batch_size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shuffled_chunks_partition_rows() -> anyhow::Result<()> {
        let x = Tensor::arange(0f32, 20f32, &Device::Cpu)?.reshape((10, 2))?;
        let b = Tensor::arange(0f32, 10f32, &Device::Cpu)?.reshape((10, 1))?;
        let mut data = InMemoryData::new_with_batch(&x, &b)?;

        assert!(data.minibatch_shuffled(0, &Device::Cpu).is_err());

        data.shuffle_minibatch(4)?;
        assert_eq!(data.num_minibatch(), 3);

        let mut seen = vec![];
        for j in 0..data.num_minibatch() {
            let mb = data.minibatch_shuffled(j, &Device::Cpu)?;
            let xx = mb.input.to_vec2::<f32>()?;
            let bb = mb.batch.ok_or(anyhow::anyhow!("batch"))?.to_vec2::<f32>()?;
            for (x_i, b_i) in xx.iter().zip(bb.iter()) {
                // rows stay paired
                assert_eq!(x_i[0], 2. * b_i[0]);
                seen.push(b_i[0] as usize);
            }
        }
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn mismatched_batch_rows() -> anyhow::Result<()> {
        let x = Tensor::zeros((3, 2), candle_core::DType::F32, &Device::Cpu)?;
        let b = Tensor::zeros((4, 2), candle_core::DType::F32, &Device::Cpu)?;
        assert!(InMemoryData::new_with_batch(&x, &b).is_err());
        Ok(())
    }
}
