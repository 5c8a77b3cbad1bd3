use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use csv::{ReaderBuilder, StringRecord};
use log::{debug, info, warn};

use crate::core::error::Error;

pub const MIN_YEAR: i32 = 1888;
pub const MAX_YEAR: i32 = 2100;

const DATE_FORMATS: [&str; 6] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%m-%d-%Y"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%SZ"];

/// One row of a Letterboxd watchlist export.
#[derive(Clone, Debug, PartialEq)]
pub struct WatchlistEntry {
    pub name: String,
    pub year: i32,
    pub letterboxd_uri: String,
    pub date_added: Option<DateTime<Utc>>,
}

/// One row of a Letterboxd list export.
#[derive(Clone, Debug, PartialEq)]
pub struct ListEntry {
    pub name: String,
    pub year: Option<i32>,
    pub letterboxd_uri: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    Name,
    Year,
    Uri,
    Date,
}

impl Field {
    fn label(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Year => "year",
            Field::Uri => "letterboxd_uri",
            Field::Date => "date",
        }
    }
}

#[derive(Default, Debug)]
struct Columns {
    name: Option<usize>,
    year: Option<usize>,
    uri: Option<usize>,
    date: Option<usize>,
}

impl Columns {
    fn slot(&mut self, field: Field) -> &mut Option<usize> {
        match field {
            Field::Name => &mut self.name,
            Field::Year => &mut self.year,
            Field::Uri => &mut self.uri,
            Field::Date => &mut self.date,
        }
    }

    fn assign(&mut self, field: Field, idx: usize) {
        let slot = self.slot(field);
        if slot.is_none() {
            *slot = Some(idx);
        }
    }

    fn missing(&mut self, required: &[Field]) -> Vec<Field> {
        required.iter().copied().filter(|f| self.slot(*f).is_none()).collect()
    }
}

/// UTF-8 (BOM stripped) with a Latin-1 fallback.
pub fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim_start_matches('\u{feff}').to_string(),
        Err(_) => {
            debug!("csv is not valid utf-8, decoding as latin-1");
            bytes.iter().map(|b| *b as char).collect()
        }
    }
}

fn read_table(text: &str, skip_records: usize) -> Result<(Vec<String>, Vec<StringRecord>), Error> {
    if text.trim().is_empty() {
        return Err(Error::InvalidCsv("CSV file is empty".to_string()));
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::InvalidCsv(format!("Error parsing CSV file: {}", e)))?;
        records.push(record);
    }

    let mut rows = records.into_iter()
        .skip(skip_records)
        .filter(|r| r.iter().any(|cell| !cell.trim().is_empty()));

    let header = rows.next()
        .ok_or_else(|| Error::InvalidCsv("CSV file is empty".to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    Ok((header, rows.collect()))
}

fn watchlist_field(header: &str) -> Option<Field> {
    let h = header.to_lowercase();
    match h.as_str() {
        "name" | "title" | "movie" | "film" => Some(Field::Name),
        "year" | "release_year" => Some(Field::Year),
        "uri" | "url" | "link" => Some(Field::Uri),
        "date" | "added" | "date added" | "date_added" | "watched date" => Some(Field::Date),
        _ if h.contains("letterboxd") && (h.contains("uri") || h.contains("url") || h.contains("link")) =>
            Some(Field::Uri),
        _ => None,
    }
}

fn list_field(header: &str) -> Option<Field> {
    match header.to_lowercase().as_str() {
        "name" | "title" | "movie" | "film" => Some(Field::Name),
        "year" | "release_year" => Some(Field::Year),
        "url" | "uri" | "link" | "letterboxd uri" | "letterboxd_uri" => Some(Field::Uri),
        _ => None,
    }
}

/// How strongly an unrecognised header resembles a required field.
fn lenient_score(field: Field, header: &str) -> u32 {
    let h: String = header.to_lowercase().chars().filter(|c| !matches!(c, '_' | '-' | ' ')).collect();
    match field {
        Field::Uri if h.contains("letterboxd") && (h.contains("uri") || h.contains("url")) => 100,
        Field::Uri if h.contains("uri") => 50,
        Field::Uri if h.contains("url") => 40,
        Field::Uri if h.contains("link") => 30,
        Field::Name if h.contains("name") => 50,
        Field::Name if h.contains("title") => 40,
        Field::Name if h.contains("movie") || h.contains("film") => 30,
        Field::Year if h.contains("year") => 50,
        Field::Year if h.contains("date") => 20,
        _ => 0,
    }
}

fn map_columns(header: &[String], classify: fn(&str) -> Option<Field>) -> (Columns, Vec<bool>) {
    let mut columns = Columns::default();
    let mut mapped = vec![false; header.len()];
    for (idx, h) in header.iter().enumerate() {
        if let Some(field) = classify(h) {
            columns.assign(field, idx);
            mapped[idx] = true;
        }
    }
    (columns, mapped)
}

fn cell(record: &StringRecord, idx: Option<usize>) -> &str {
    idx.and_then(|i| record.get(i)).map(str::trim).unwrap_or("")
}

/// Accepts "1999" and the "1999.0" some spreadsheet exports produce.
pub fn parse_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    raw.parse::<i32>().ok().or_else(|| {
        raw.parse::<f64>().ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i32::MAX as f64)
            .map(|f| f as i32)
    })
}

pub fn year_in_range(year: i32) -> bool {
    (MIN_YEAR..=MAX_YEAR).contains(&year)
}

pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() || matches!(raw.to_lowercase().as_str(), "nan" | "none") {
        return None;
    }

    DATE_FORMATS.iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .or_else(|| DATETIME_FORMATS.iter().find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok()))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|d| d.with_timezone(&Utc)))
}

/// Parses a watchlist export, mapping header variants onto name/year/uri/date.
/// Rows with an unusable year, name or uri are skipped.
pub fn parse_watchlist(bytes: &[u8]) -> Result<Vec<WatchlistEntry>, Error> {
    let text = decode(bytes);
    let (header, rows) = read_table(&text, 0)?;
    info!("csv columns {:?}", header);

    let required = [Field::Name, Field::Year, Field::Uri];
    let (mut columns, mut mapped) = map_columns(&header, watchlist_field);

    for field in columns.missing(&required) {
        let best = header.iter().enumerate()
            .filter(|(idx, _)| !mapped[*idx])
            .map(|(idx, h)| (idx, lenient_score(field, h)))
            .filter(|(_, score)| *score > 0)
            .fold(None, |best: Option<(usize, u32)>, cur| match best {
                Some(b) if b.1 >= cur.1 => Some(b),
                _ => Some(cur),
            });
        if let Some((idx, score)) = best {
            warn!("lenient column match (score {}): '{}' -> '{}'", score, header[idx], field.label());
            columns.assign(field, idx);
            mapped[idx] = true;
        }
    }

    let missing = columns.missing(&required);
    if !missing.is_empty() {
        let labels: Vec<&str> = missing.iter().map(Field::label).collect();
        return Err(Error::InvalidCsv(format!(
            "Missing required columns: {:?}. Original columns from CSV: {:?}",
            labels, header,
        )));
    }

    let mut entries = Vec::with_capacity(rows.len());
    for (idx, record) in rows.iter().enumerate() {
        let row = idx + 1;
        let name = cell(record, columns.name);
        let uri = cell(record, columns.uri);
        let raw_year = cell(record, columns.year);

        let year = match parse_year(raw_year) {
            Some(y) if year_in_range(y) => y,
            _ => {
                warn!("row {}: invalid year '{}', skipping", row, raw_year);
                continue;
            }
        };

        if name.is_empty() || uri.is_empty() {
            warn!("row {}: missing name or uri, skipping", row);
            continue;
        }

        let raw_date = cell(record, columns.date);
        let date_added = parse_date(raw_date);
        if date_added.is_none() && !raw_date.is_empty() {
            warn!("row {}: could not parse date '{}', ignoring", row, raw_date);
        }

        entries.push(WatchlistEntry {
            name: name.to_string(),
            year,
            letterboxd_uri: uri.to_string(),
            date_added,
        });
    }

    info!("parsed {} movies from csv", entries.len());
    Ok(entries)
}

/// Parses a Letterboxd list export: three preamble rows describing the list,
/// then a `Position,Name,Year,URL,Description` table.
pub fn parse_tracked_list(bytes: &[u8]) -> Result<Vec<ListEntry>, Error> {
    let text = decode(bytes);
    let (header, rows) = read_table(&text, 3)?;
    let (mut columns, _) = map_columns(&header, list_field);

    let missing = columns.missing(&[Field::Name, Field::Year]);
    if !missing.is_empty() {
        let labels: Vec<&str> = missing.iter().map(Field::label).collect();
        return Err(Error::InvalidCsv(format!(
            "Missing required columns: {:?}. Found columns: {:?}", labels, header,
        )));
    }

    let mut entries = Vec::with_capacity(rows.len());
    for (idx, record) in rows.iter().enumerate() {
        let name = cell(record, columns.name);
        if name.is_empty() {
            continue;
        }

        let raw_year = cell(record, columns.year);
        let year = if raw_year.is_empty() {
            None
        } else {
            match parse_year(raw_year) {
                Some(y) if year_in_range(y) => Some(y),
                _ => {
                    warn!("row {}: invalid year '{}', skipping", idx + 1, raw_year);
                    continue;
                }
            }
        };

        let uri = cell(record, columns.uri);
        entries.push(ListEntry {
            name: name.to_string(),
            year,
            letterboxd_uri: if uri.is_empty() || uri.eq_ignore_ascii_case("nan") {
                None
            } else {
                Some(uri.to_string())
            },
        });
    }

    debug!("parsed {} movies from tracked list", entries.len());
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn parses_letterboxd_export() {
        let csv = "Date,Name,Year,Letterboxd URI\n\
                   2024-01-15,Heat,1995,https://boxd.it/2bRu\n\
                   2023-12-01,\"Paris, Texas\",1984,https://boxd.it/29Ow\n";
        let entries = parse_watchlist(csv.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].name, "Paris, Texas");
        assert_eq!(entries[1].year, 1984);
        assert_eq!(entries[0].letterboxd_uri, "https://boxd.it/2bRu");
        let added = entries[0].date_added.unwrap();
        assert_eq!((added.year(), added.month(), added.day()), (2024, 1, 15));
    }

    #[test]
    fn maps_header_variants_and_bom() {
        let csv = "\u{feff}Title,release_year,URL,Date Added\nAlien,1979.0,https://boxd.it/a,01/15/2024\n";
        let entries = parse_watchlist(csv.as_bytes()).unwrap();
        assert_eq!(entries[0].name, "Alien");
        assert_eq!(entries[0].year, 1979);
        assert_eq!(entries[0].date_added.unwrap().month(), 1);
    }

    #[test]
    fn lenient_matching_finds_odd_headers() {
        let csv = "Film Name,Year Released,Link To Page\nAlien,1979,https://boxd.it/a\n";
        let entries = parse_watchlist(csv.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].letterboxd_uri, "https://boxd.it/a");
    }

    #[test]
    fn reports_missing_columns() {
        let err = parse_watchlist(b"Rating,Comment\n5,great\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Missing required columns"), "{}", msg);
        assert!(msg.contains("letterboxd_uri"), "{}", msg);
    }

    #[test]
    fn rejects_empty_file() {
        assert!(matches!(parse_watchlist(b"  \n"), Err(Error::InvalidCsv(_))));
    }

    #[test]
    fn skips_bad_rows() {
        let csv = "Name,Year,Letterboxd URI\n\
                   Early,1700,https://boxd.it/a\n\
                   Unknown,soon,https://boxd.it/b\n\
                   ,2001,https://boxd.it/c\n\
                   No Link,2001,\n\
                   Fine,2001,https://boxd.it/d\n";
        let entries = parse_watchlist(csv.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Fine");
    }

    #[test]
    fn unparseable_dates_are_ignored() {
        let csv = "Name,Year,Letterboxd URI,Date\nFine,2001,https://boxd.it/d,someday\n";
        let entries = parse_watchlist(csv.as_bytes()).unwrap();
        assert_eq!(entries[0].date_added, None);
    }

    #[test]
    fn latin1_fallback() {
        let mut bytes = b"Name,Year,Letterboxd URI\n".to_vec();
        bytes.extend_from_slice(&[b'A', b'm', 0xe9, b'l', b'i', b'e']);
        bytes.extend_from_slice(b",2001,https://boxd.it/e\n");
        let entries = parse_watchlist(&bytes).unwrap();
        assert_eq!(entries[0].name, "Amélie");
    }

    #[test]
    fn date_formats() {
        let d = parse_date("2024-01-15T12:30:00Z").unwrap();
        assert_eq!((d.hour(), d.minute()), (12, 30));
        assert_eq!(parse_date("15/01/2024").unwrap().day(), 15);
        assert_eq!(parse_date("2024/01/15").unwrap().day(), 15);
        assert!(parse_date("nan").is_none());
    }

    #[test]
    fn parses_list_export() {
        let csv = "Letterboxd list export v7\n\
                   Date,Name,Tags,URL,Description\n\
                   2024-01-01,Top 250,,https://letterboxd.com/x/list/top/,\"Best\nfilms\"\n\
                   \n\
                   Position,Name,Year,URL,Description\n\
                   1,Harakiri,1962,https://boxd.it/1,\n\
                   2,Mystery Film,,,\n\
                   3,Bad Year,99999,https://boxd.it/3,\n\
                   4,,2000,https://boxd.it/4,\n";
        let entries = parse_tracked_list(csv.as_bytes()).unwrap();
        assert_eq!(entries, vec![
            ListEntry { name: "Harakiri".into(), year: Some(1962), letterboxd_uri: Some("https://boxd.it/1".into()) },
            ListEntry { name: "Mystery Film".into(), year: None, letterboxd_uri: None },
        ]);
    }

    #[test]
    fn list_requires_name_and_year() {
        let csv = "a\nb\nc\nPosition,Name,URL\n1,Heat,https://boxd.it/1\n";
        assert!(matches!(parse_tracked_list(csv.as_bytes()), Err(Error::InvalidCsv(_))));
    }
}
