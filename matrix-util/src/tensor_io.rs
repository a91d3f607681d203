use crate::common_io::{read_lines_of_types, write_lines, Delimiter};
use crate::traits::IoOps;
use candle_core::{Device, Tensor};

impl IoOps for Tensor {
    type Scalar = f32;
    type Mat = Self;

    fn read_file_delim(
        tsv_file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat> {
        let hdr_line = match skip {
            Some(skip) => skip as i64,
            None => -1, // no skipping
        };

        let data = read_lines_of_types::<f32>(tsv_file, delim, hdr_line)?.lines;

        if data.is_empty() {
            return Err(anyhow::anyhow!("No data in file {}", tsv_file));
        }

        let ncols = data[0].len();
        let nrows = data.len();

        if let Some(i) = data.iter().position(|x| x.len() != ncols) {
            return Err(anyhow::anyhow!(
                "row {} has {} columns, expected {}",
                i,
                data[i].len(),
                ncols
            ));
        }

        let data = data.into_iter().flatten().collect::<Vec<_>>();

        Ok(Tensor::from_vec(data, (nrows, ncols), &Device::Cpu)?)
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()> {
        let rows: Vec<Vec<f32>> = match self.rank() {
            1 => self
                .to_device(&Device::Cpu)?
                .to_dtype(candle_core::DType::F32)?
                .to_vec1::<f32>()?
                .into_iter()
                .map(|x| vec![x])
                .collect(),
            2 => self
                .to_device(&Device::Cpu)?
                .to_dtype(candle_core::DType::F32)?
                .to_vec2::<f32>()?,
            r => return Err(anyhow::anyhow!("Expected 1 or 2 dimensions, got {}", r)),
        };

        let lines: Vec<Box<str>> = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|x| format!("{}", x))
                    .collect::<Vec<_>>()
                    .join(delim)
                    .into_boxed_str()
            })
            .collect();

        write_lines(&lines, file)?;

        Ok(())
    }
}
