use crate::mtx_io::{read_mtx_triplets, write_mtx_triplets};
use crate::traits::MatTriplets;
use candle_core::{Device, Tensor};
pub use nalgebra_sparse::{coo::CooMatrix, csc::CscMatrix};

impl MatTriplets for CscMatrix<f32> {
    type Mat = Self;
    type Scalar = f32;

    fn from_nonzero_triplets(
        nrow: usize,
        ncol: usize,
        triplets: Vec<(usize, usize, Self::Scalar)>,
    ) -> anyhow::Result<Self::Mat> {
        let mut rows = Vec::with_capacity(triplets.len());
        let mut cols = Vec::with_capacity(triplets.len());
        let mut vals = Vec::with_capacity(triplets.len());
        for (i, j, x_ij) in triplets {
            rows.push(i);
            cols.push(j);
            vals.push(x_ij);
        }
        let coo = CooMatrix::try_from_triplets(nrow, ncol, rows, cols, vals)
            .map_err(|e| anyhow::anyhow!("invalid {} x {} triplets: {}", nrow, ncol, e))?;
        Ok(CscMatrix::from(&coo))
    }

    fn to_nonzero_triplets(
        &self,
    ) -> anyhow::Result<(usize, usize, Vec<(usize, usize, Self::Scalar)>)> {
        let triplets = self
            .triplet_iter()
            .filter(|(_, _, x)| **x != 0.0)
            .map(|(i, j, &x)| (i, j, x))
            .collect();
        Ok((self.nrows(), self.ncols(), triplets))
    }
}

/// Densify a sparse matrix into a row-major `Tensor`
///
/// * `csc` - sparse matrix
/// * `dev` - target device
pub fn csc_to_tensor(csc: &CscMatrix<f32>, dev: &Device) -> candle_core::Result<Tensor> {
    let (nrow, ncol) = (csc.nrows(), csc.ncols());
    let mut data = vec![0_f32; nrow * ncol];
    for (i, j, &x_ij) in csc.triplet_iter() {
        data[i * ncol + j] += x_ij;
    }
    Tensor::from_vec(data, (nrow, ncol), dev)
}

/// Write a sparse matrix to a MatrixMarket file
pub fn write_csc_mtx(csc: &CscMatrix<f32>, mtx_file: &str) -> anyhow::Result<()> {
    let (nrow, ncol, triplets) = csc.to_nonzero_triplets()?;
    write_mtx_triplets(&triplets, nrow, ncol, mtx_file)
}

/// Read a sparse matrix from a MatrixMarket file
pub fn read_csc_mtx(mtx_file: &str) -> anyhow::Result<CscMatrix<f32>> {
    let (triplets, (nrow, ncol, _)) = read_mtx_triplets(mtx_file)?;
    CscMatrix::<f32>::from_nonzero_triplets(nrow, ncol, triplets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csc_densifies_row_major() -> anyhow::Result<()> {
        let csc = CscMatrix::<f32>::from_nonzero_triplets(
            2,
            3,
            vec![(0, 2, 1.0), (1, 0, -2.0), (1, 1, 0.5)],
        )?;
        let x = csc_to_tensor(&csc, &Device::Cpu)?;
        assert_eq!(
            x.to_vec2::<f32>()?,
            vec![vec![0.0, 0.0, 1.0], vec![-2.0, 0.5, 0.0]]
        );
        Ok(())
    }

    #[test]
    fn out_of_bounds_triplets_are_rejected() {
        let bad = CscMatrix::<f32>::from_nonzero_triplets(2, 2, vec![(0, 0, 1.0), (2, 1, 1.0)]);
        assert!(bad.is_err());
    }
}
