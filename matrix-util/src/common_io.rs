use flate2::read::GzDecoder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::tempdir;

/// Column separator of delimited text files
pub struct Delimiter(String);

impl From<&str> for Delimiter {
    fn from(s: &str) -> Self {
        Delimiter(s.to_string())
    }
}

impl Delimiter {
    fn split<'a>(&'a self, line: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        line.split(self.0.as_str())
    }
}

/// Write every line into `output_file_path` (gzipped if `.gz`)
pub fn write_lines(lines: &[Box<str>], output_file_path: &str) -> anyhow::Result<()> {
    write_types(lines, output_file_path)
}

/// Write every displayable item as a line, e.g., a loss trace
///
/// A closed pipe (`| head`) ends writing quietly.
pub fn write_types<T>(lines: &[T], output_file_path: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file_path)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            } else {
                return Err(anyhow::anyhow!("unexpected error: {}", e));
            }
        }
    }
    buf.flush()?;
    Ok(())
}

pub struct ReadLinesOut<T: Send> {
    pub lines: Vec<Vec<T>>,
    pub header: Vec<Box<str>>,
}

fn is_not_comment_line(line: &str) -> bool {
    !(line.starts_with('#') || line.starts_with('%') || line.trim().is_empty())
}

/// Read non-comment lines and parse every body line with `parse_fn`
///
/// Lines starting with `#` or `%` and blank lines are skipped before
/// the header position is counted.
///
/// * `input_file` - file name--either gzipped or not
/// * `hdr_line` - location of a header line (-1 = no header line)
/// * `parse_header_fn` - how to split the header line
/// * `parse_fn` - how to parse a body line; the first error is returned
pub fn read_lines_of_words_generic<T>(
    input_file: &str,
    hdr_line: i64,
    parse_header_fn: impl Fn(&str) -> Vec<Box<str>> + Sync,
    parse_fn: impl Fn(&str) -> anyhow::Result<Vec<T>> + Sync,
) -> anyhow::Result<ReadLinesOut<T>>
where
    T: Send,
{
    let buf_reader: Box<dyn BufRead> = open_buf_reader(input_file)?;

    let lines_raw: Vec<Box<str>> = buf_reader
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", input_file, e))?
        .into_iter()
        .map(|x| x.into_boxed_str())
        .filter(|x| is_not_comment_line(x.as_ref()))
        .collect();

    let mut header = vec![];

    let body = if hdr_line < 0 {
        &lines_raw[..]
    } else {
        let n_skip = hdr_line as usize;
        if lines_raw.len() < (n_skip + 1) {
            return Err(anyhow::anyhow!("not enough data in {}", input_file));
        }
        header.extend(parse_header_fn(&lines_raw[n_skip]));
        &lines_raw[(n_skip + 1)..]
    };

    // parsing is the slow part; `collect` keeps the original order
    let lines = body
        .par_iter()
        .map(|s| parse_fn(s.as_ref()))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(ReadLinesOut { lines, header })
}

/// Read a delimited file of numbers (or any `FromStr` type) row by row
///
/// * `input_file` - file name--either gzipped or not
/// * `delim` - delimiter
/// * `hdr_line` - location of a header line (-1 = no header line)
pub fn read_lines_of_types<T>(
    input_file: &str,
    delim: impl Into<Delimiter>,
    hdr_line: i64,
) -> anyhow::Result<ReadLinesOut<T>>
where
    T: Send + std::str::FromStr,
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    let delim = delim.into();

    let parse_fn = |line: &str| -> anyhow::Result<Vec<T>> {
        delim
            .split(line)
            .map(|x| {
                x.trim()
                    .parse::<T>()
                    .map_err(|e| anyhow::anyhow!("failed to parse `{}`: {}", x, e))
            })
            .collect()
    };

    let parse_header_fn = |line: &str| -> Vec<Box<str>> {
        line.split_whitespace()
            .map(|x| x.to_owned().into_boxed_str())
            .collect()
    };

    read_lines_of_words_generic(input_file, hdr_line, parse_header_fn, parse_fn)
}

/// Whitespace-separated words per line, e.g., MatrixMarket triplets
pub fn read_lines_of_words(
    input_file: &str,
    hdr_line: i64,
) -> anyhow::Result<ReadLinesOut<Box<str>>> {
    let split_fn = |line: &str| -> Vec<Box<str>> {
        line.split_whitespace()
            .map(|x| x.to_owned().into_boxed_str())
            .collect()
    };

    read_lines_of_words_generic(input_file, hdr_line, split_fn, |line| Ok(split_fn(line)))
}

/// Buffered reader, decompressing `.gz` files
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

/// Buffered writer, compressing `.gz` files; `stdout` writes to the
/// standard output
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn std::io::Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

/// Create the parent directory of `file` if needed
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    let path = Path::new(file);
    let dir = path.parent().ok_or(anyhow::anyhow!("no parent"))?;
    if !dir.as_os_str().is_empty() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// A fresh file name with `suffix` inside a temporary directory
pub fn create_temp_dir_file(suffix: &str) -> anyhow::Result<std::path::PathBuf> {
    let temp_dir = tempdir()?.path().to_path_buf();
    std::fs::create_dir_all(&temp_dir)?;
    let temp_file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile_in(&temp_dir)?
        .path()
        .to_owned();

    Ok(temp_file)
}
