use crate::common_io::*;
use std::io::Write;

/// Write the triplets into a MatrixMarket file with 1-based indices
/// * `triplets` - the triplets to write
/// * `nrow` - number of rows
/// * `ncol` - number of columns
/// * `mtx_file` - the output file (e.g., "basis.mtx.gz")
pub fn write_mtx_triplets(
    triplets: &[(usize, usize, f32)],
    nrow: usize,
    ncol: usize,
    mtx_file: &str,
) -> anyhow::Result<()> {
    mkdir(mtx_file)?;

    let mut buf = open_buf_writer(mtx_file)?;

    // write the header
    let nnz = triplets.len();
    writeln!(buf, "%%MatrixMarket matrix coordinate real general")?;
    writeln!(buf, "{}\t{}\t{}", nrow, ncol, nnz)?;

    // write them with 1-based indices
    for (row, col, val) in triplets {
        writeln!(buf, "{}\t{}\t{}", row + 1, col + 1, val)?;
    }

    buf.flush()?;
    Ok(())
}

/// Read a matrix market file and return a vector of triplets
/// (row, col, val) with 0-based indices and the `(nrow, ncol, nnz)` header
/// * `mtx_file` - Path to the matrix market file
pub fn read_mtx_triplets(
    mtx_file: &str,
) -> anyhow::Result<(Vec<(usize, usize, f32)>, (usize, usize, usize))> {
    let mtx_hdr_position = 0;
    let ReadLinesOut { lines, header } = read_lines_of_words(mtx_file, mtx_hdr_position)?;

    if header.len() != 3 {
        return Err(anyhow::anyhow!("Failed to parse mtx header in {}", mtx_file));
    }

    let nrow = header[0].parse::<usize>()?;
    let ncol = header[1].parse::<usize>()?;
    let nnz = header[2].parse::<usize>()?;

    let mut triplets = Vec::with_capacity(nnz);
    for words in lines.iter() {
        if words.len() != 3 {
            return Err(anyhow::anyhow!("expected `row col value`: {:?}", words));
        }
        let row = words[0].parse::<usize>()?;
        let col = words[1].parse::<usize>()?;
        let val = words[2].parse::<f32>()?;

        if row == 0 || col == 0 || row > nrow || col > ncol {
            return Err(anyhow::anyhow!(
                "({}, {}) lies outside of {} x {}",
                row,
                col,
                nrow,
                ncol
            ));
        }
        // convert 1-based to 0-based
        triplets.push((row - 1, col - 1, val));
    }

    if triplets.len() != nnz {
        log::warn!(
            "{}: header says {} non-zeros, found {}",
            mtx_file,
            nnz,
            triplets.len()
        );
    }

    Ok((triplets, (nrow, ncol, nnz)))
}
