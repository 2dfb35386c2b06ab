// src/task/fastq.rs

//! Minimal FASTQ/FASTA handling for the read-processing tasks.

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};

/// Derive an output file name from an Illumina read file name.
///
/// `sample_S1_L001_R1_001.fastq.gz` with suffix `.trimmed.fastq` becomes
/// `sample_S1_L001_R1_001.trimmed.fastq`; with `merged` the read marker is
/// dropped: `sample_S1_L001_001.merged.fastq`.
pub fn read_file_product(readfile: &Path, suffix: &str, merged: bool) -> String {
    let name = readfile
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut stem = name
        .strip_suffix(".fastq.gz")
        .or_else(|| name.strip_suffix(".fastq"))
        .unwrap_or(&name)
        .to_string();
    if merged {
        for marker in ["_R1_", "_R2_"] {
            if let Some(pos) = stem.rfind(marker) {
                stem.replace_range(pos..pos + marker.len(), "_");
                break;
            }
        }
    }
    format!("{stem}{suffix}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqRecord {
    pub header: String,
    pub seq: String,
    pub plus: String,
    pub qual: String,
}

impl FastqRecord {
    pub fn write_to(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "{}\n{}\n{}\n{}", self.header, self.seq, self.plus, self.qual)
    }
}

/// Four-line FASTQ reader.
pub struct FastqReader<R> {
    inner: R,
    line: usize,
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, line: 0 }
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        let mut buf = String::new();
        let n = self.inner.read_line(&mut buf).context("reading FASTQ")?;
        if n == 0 {
            return Ok(None);
        }
        self.line += 1;
        Ok(Some(buf.trim_end_matches(['\n', '\r']).to_string()))
    }

    pub fn next_record(&mut self) -> Result<Option<FastqRecord>> {
        let header = loop {
            match self.next_line()? {
                None => return Ok(None),
                Some(l) if l.is_empty() => continue,
                Some(l) => break l,
            }
        };
        if !header.starts_with('@') {
            bail!("line {}: expected '@' header, got {header:?}", self.line);
        }
        let (Some(seq), Some(plus), Some(qual)) =
            (self.next_line()?, self.next_line()?, self.next_line()?)
        else {
            bail!("line {}: truncated FASTQ record", self.line);
        };
        if qual.len() != seq.len() {
            bail!("line {}: quality length does not match sequence", self.line);
        }
        Ok(Some(FastqRecord {
            header,
            seq,
            plus,
            qual,
        }))
    }
}

/// Write R1 and R2 records alternately until either input runs out.
/// Returns the number of pairs written.
pub fn interleave(r1: impl BufRead, r2: impl BufRead, out: &mut impl Write) -> Result<usize> {
    let mut a = FastqReader::new(r1);
    let mut b = FastqReader::new(r2);
    let mut pairs = 0;
    while let (Some(x), Some(y)) = (a.next_record()?, b.next_record()?) {
        x.write_to(out)?;
        y.write_to(out)?;
        pairs += 1;
    }
    Ok(pairs)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    /// Header without the leading `>`, up to the first whitespace.
    pub id: String,
    pub seq: String,
}

pub fn read_fasta(input: impl BufRead) -> Result<Vec<FastaRecord>> {
    let mut records = Vec::new();
    let mut current: Option<FastaRecord> = None;
    for line in input.lines() {
        let line = line.context("reading FASTA")?;
        let line = line.trim_end();
        if let Some(header) = line.strip_prefix('>') {
            if let Some(rec) = current.take() {
                records.push(rec);
            }
            let id = header.split_whitespace().next().unwrap_or_default();
            current = Some(FastaRecord {
                id: id.to_string(),
                seq: String::new(),
            });
        } else if let Some(rec) = current.as_mut() {
            rec.seq.push_str(line.trim());
        }
    }
    if let Some(rec) = current {
        records.push(rec);
    }
    Ok(records)
}

/// Contig number from a SPAdes id like `NODE_12_length_500_cov_3.1`.
pub fn spades_contig_number(id: &str) -> Option<&str> {
    let rest = id.strip_prefix("NODE_")?;
    let end = rest.find('_').unwrap_or(rest.len());
    let num = &rest[..end];
    (!num.is_empty() && num.bytes().all(|b| b.is_ascii_digit())).then_some(num)
}

/// FASTQ-format contigs longer than `min_len`, with a flat quality score and
/// ids rewritten to `<prefix>-contig_<n>`.
pub fn contigs_to_fastq(
    contigs: &[FastaRecord],
    prefix: &str,
    min_len: usize,
    quality: u8,
    out: &mut impl Write,
) -> Result<usize> {
    let qual_char = char::from(quality.saturating_add(33));
    let mut written = 0;
    for (i, contig) in contigs.iter().enumerate() {
        if contig.seq.len() <= min_len {
            continue;
        }
        let num = spades_contig_number(&contig.id)
            .map(str::to_string)
            .unwrap_or_else(|| (i + 1).to_string());
        let rec = FastqRecord {
            header: format!("@{prefix}-contig_{num}"),
            seq: contig.seq.clone(),
            plus: "+".to_string(),
            qual: std::iter::repeat_n(qual_char, contig.seq.len()).collect(),
        };
        rec.write_to(out)?;
        written += 1;
    }
    Ok(written)
}
