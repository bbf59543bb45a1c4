use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use bio::io::fasta;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use crate::error::{ProjectError, Result};
use crate::table::{Record, Table};
use crate::tree::{newick_to_table, random_uid};

fn is_gz(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".gz")
}

/// Open a file for reading, decompressing when the path ends with `.gz`.
pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let p = path.as_ref();
    let file = File::open(p)?;
    if is_gz(p) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Create a file for writing, compressing when the path ends with `.gz`.
/// `-` writes to stdout.
///
/// The gzip trailer is written when the returned writer is dropped; callers
/// flush before dropping.
pub fn create_writer<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn Write>> {
    let p = path.as_ref();
    if p.as_os_str() == "-" {
        return Ok(Box::new(BufWriter::new(io::stdout().lock())));
    }
    let f = File::create(p)?;
    if is_gz(p) {
        let enc = GzEncoder::new(f, Compression::default());
        Ok(Box::new(BufWriter::new(enc)))
    } else {
        Ok(Box::new(BufWriter::new(f)))
    }
}

fn read_text(path: &Path) -> Result<String> {
    let mut content = String::new();
    open_reader(path)?.read_to_string(&mut content)?;
    Ok(content)
}

/// Read a FASTA file: one row per record, `uid` and `id` set to the record id.
pub fn read_fasta<P: AsRef<Path>>(path: P) -> Result<Table> {
    let p = path.as_ref();
    fasta::Reader::new(open_reader(p)?)
        .records()
        .map(|record| {
            let record = record.map_err(|e| ProjectError::parse(p, e.to_string()))?;
            let sequence = String::from_utf8_lossy(record.seq()).into_owned();
            Ok(Record {
                description: record.desc().map(str::to_string),
                id: Some(record.id().to_string()),
                sequence: Some(sequence),
                ..Record::new(record.id())
            })
        })
        .collect()
}

/// Read the first tree of a Newick file.
///
/// The tree may span several lines; everything up to the first `;` is used.
pub fn read_newick<P: AsRef<Path>>(path: P) -> Result<Table> {
    let p = path.as_ref();
    let content = read_text(p)?;
    let newick: String = content.lines().map(str::trim).collect();
    let end = newick
        .find(';')
        .ok_or_else(|| ProjectError::parse(p, "no ';'-terminated tree found"))?;
    newick_to_table(&newick[..=end]).map_err(|e| ProjectError::parse(p, e.to_string()))
}

/// Read a delimited table with a header row naming table columns.
///
/// Columns may appear in any order and any subset; rows without a uid get a
/// generated one.
pub fn read_csv<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<Table> {
    let p = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_reader(open_reader(p)?);
    reader
        .deserialize::<Record>()
        .enumerate()
        .map(|(line, row)| {
            let mut record = row.map_err(|e| ProjectError::parse(p, format!("row {}: {e}", line + 1)))?;
            if record.uid.is_empty() {
                record.uid = random_uid();
            }
            Ok(record)
        })
        .collect()
}

/// Read relaxed sequential PHYLIP.
///
/// STRUCTURE:
///  3 5
/// A     MKVLA
/// B     MKILA
/// C     MRVLA
pub fn read_phylip<P: AsRef<Path>>(path: P) -> Result<Table> {
    let p = path.as_ref();
    let content = read_text(p)?;
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());

    let header = lines.next().ok_or_else(|| ProjectError::parse(p, "empty file"))?;
    let mut counts = header.split_whitespace().map(str::parse::<usize>);
    let (taxa, sites) = match (counts.next(), counts.next()) {
        (Some(Ok(taxa)), Some(Ok(sites))) => (taxa, sites),
        _ => return Err(ProjectError::parse(p, format!("bad header '{}'", header.trim()))),
    };

    let rows = lines
        .map(|line| {
            let line = line.trim();
            let (name, rest) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| ProjectError::parse(p, format!("no sequence for '{line}'")))?;
            let sequence: String = rest.split_whitespace().collect();
            if sequence.len() != sites {
                return Err(ProjectError::parse(
                    p,
                    format!("'{name}' has {} sites, header says {sites}", sequence.len()),
                ));
            }
            Ok(Record {
                id: Some(name.to_string()),
                sequence: Some(sequence),
                ..Record::new(name)
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if rows.len() != taxa {
        return Err(ProjectError::parse(
            p,
            format!("header says {taxa} sequences, found {}", rows.len()),
        ));
    }
    Ok(Table::from_records(rows))
}

/// Fail with `InvalidOption` on `name_column` if a name cannot be written as
/// PHYLIP, i.e. is empty or contains whitespace.
pub fn check_phylip_names(alignment: &[(String, String)], name_column: &str) -> Result<()> {
    match alignment.iter().find(|(name, _)| !is_phylip_name(name)) {
        Some((name, _)) => Err(ProjectError::invalid_option(
            name_column,
            format!("name '{name}' cannot be written as PHYLIP (empty or contains whitespace)"),
        )),
        None => Ok(()),
    }
}

fn is_phylip_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(char::is_whitespace)
}

/// Write `(name, sequence)` pairs as relaxed sequential PHYLIP.
///
/// The site count in the header is the length of the first sequence. Names
/// must be non-empty and free of whitespace; nothing is written otherwise.
pub fn write_phylip<P: AsRef<Path>>(path: P, alignment: &[(String, String)]) -> io::Result<()> {
    if let Some((name, _)) = alignment.iter().find(|(name, _)| !is_phylip_name(name)) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("PHYLIP name '{name}' is empty or contains whitespace"),
        ));
    }
    let sites = alignment.first().map(|(_, s)| s.len()).unwrap_or(0);
    let width = alignment.iter().map(|(n, _)| n.len()).max().unwrap_or(0);

    let mut out = create_writer(path)?;
    writeln!(&mut out, " {} {}", alignment.len(), sites)?;
    for (name, sequence) in alignment {
        writeln!(&mut out, "{name:<width$}  {sequence}")?;
    }
    out.flush()?;
    Ok(())
}

/// Write the table as CSV with the column names as header.
/// If `path` ends with `.gz`, the output is gzip-compressed.
pub fn write_table_csv<P: AsRef<Path>>(path: P, table: &Table) -> Result<()> {
    let mut writer = csv::Writer::from_writer(create_writer(path)?);
    if table.is_empty() {
        writer
            .write_record(table.columns())
            .map_err(|e| io::Error::other(e.to_string()))?;
    }
    for record in table.iter() {
        writer
            .serialize(record)
            .map_err(|e| io::Error::other(e.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// Remove a file if it exists.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
