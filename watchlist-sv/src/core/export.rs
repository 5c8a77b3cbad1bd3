use std::path::Path;

use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use log::info;
use serde_json::{Map, Value};

use crate::core::action;
use crate::core::error::Error;
use crate::core::listing::{ListingQuery, MovieSummary, QueryParams, EXPORT_LIMIT};

const DEFAULT_COLUMNS: [&str; 5] = ["title", "year", "director", "runtime", "genres"];
const LETTERBOXD_HEADER: [&str; 4] = ["Title", "Year", "Directors", "LetterboxdURI"];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Format {
    Csv,
    Json,
    Markdown,
    Letterboxd,
}

impl Format {
    pub fn parse(raw: &str) -> Result<Format, Error> {
        match raw.trim().to_lowercase().as_str() {
            "csv" => Ok(Format::Csv),
            "json" => Ok(Format::Json),
            "markdown" => Ok(Format::Markdown),
            "letterboxd" => Ok(Format::Letterboxd),
            other => Err(Error::BadRequest(format!("format must be one of csv, json, markdown, letterboxd, got {:?}", other))),
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Format::Csv | Format::Letterboxd => "text/csv",
            Format::Json => "application/json",
            Format::Markdown => "text/markdown",
        }
    }

    fn filename(self, now: DateTime<Utc>) -> String {
        let day = now.format("%Y%m%d");
        match self {
            Format::Csv => format!("movies-export-{}.csv", day),
            Format::Json => format!("movies-export-{}.json", day),
            Format::Markdown => format!("movies-export-{}.md", day),
            Format::Letterboxd => format!("letterboxd-export-{}.csv", day),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportOptions {
    pub format: Format,
    pub columns: Vec<String>,
}

impl ExportOptions {
    pub fn from_params(p: &QueryParams) -> Result<ExportOptions, Error> {
        let format = Format::parse(p.one("format").unwrap_or("csv"))?;

        let mut columns: Vec<String> = p.one("columns")
            .map(|c| c.split(',').map(str::trim).filter(|c| !c.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        if columns.is_empty() {
            columns = DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect();
            if p.boolean("include_notes")?.unwrap_or(true) {
                columns.push("notes".to_string());
            }
        }

        Ok(ExportOptions { format, columns })
    }
}

/// An export ready to be served as an attachment.
#[derive(Clone, Debug, PartialEq)]
pub struct Rendered {
    pub body: String,
    pub content_type: &'static str,
    pub filename: String,
}

fn text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items.iter()
            .map(|i| text(Some(i)))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

fn write_csv(header: &[&str], rows: Vec<Vec<String>>) -> Result<String, Error> {
    let mut out = csv::Writer::from_writer(Vec::new());
    out.write_record(header)?;
    for row in rows {
        out.write_record(&row)?;
    }
    let bytes = out.into_inner().map_err(|e| Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Renders listed movies, already serialized, in the requested format.
pub fn render(movies: &[Map<String, Value>], opts: &ExportOptions, now: DateTime<Utc>) -> Result<Rendered, Error> {
    let columns: Vec<&str> = opts.columns.iter().map(String::as_str).collect();

    let body = match opts.format {
        Format::Letterboxd => write_csv(
            &LETTERBOXD_HEADER,
            movies.iter()
                .map(|m| ["title", "year", "director", "letterboxd_uri"].iter().map(|c| text(m.get(*c))).collect())
                .collect(),
        )?,
        Format::Csv => write_csv(
            &columns,
            movies.iter()
                .map(|m| columns.iter().map(|c| text(m.get(*c))).collect())
                .collect(),
        )?,
        Format::Json => {
            let selected: Vec<Value> = movies.iter()
                .map(|m| Value::Object(columns.iter()
                    .map(|c| (c.to_string(), m.get(*c).cloned().unwrap_or(Value::Null)))
                    .collect()))
                .collect();
            serde_json::to_string_pretty(&selected)?
        }
        Format::Markdown => {
            let mut lines = vec![
                "# Movies Export\n".to_string(),
                format!("Exported: {}\n", now.format("%Y-%m-%d %H:%M:%S")),
                format!("Total: {} movies\n\n", movies.len()),
                format!("| {} |", columns.join(" | ")),
                format!("| {} |", vec!["---"; columns.len()].join(" | ")),
            ];
            for m in movies {
                let row: Vec<String> = columns.iter()
                    .map(|c| text(m.get(*c)).replace('|', "\\|"))
                    .collect();
                lines.push(format!("| {} |", row.join(" | ")));
            }
            lines.join("\n")
        }
    };

    Ok(Rendered {
        body,
        content_type: opts.format.content_type(),
        filename: opts.format.filename(now),
    })
}

fn as_object(summary: &MovieSummary) -> Result<Map<String, Value>, Error> {
    match serde_json::to_value(summary)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

/// A validated export request: rendering options plus the listing filters,
/// with `skip` ignored.
#[derive(Clone, Debug)]
pub struct ExportRequest {
    pub opts: ExportOptions,
    pub query: ListingQuery,
}

impl ExportRequest {
    pub fn parse(query_string: &str) -> Result<ExportRequest, Error> {
        let params = QueryParams::parse(query_string)?;
        let opts = ExportOptions::from_params(&params)?;
        let mut query = ListingQuery::from_params(&params, EXPORT_LIMIT, EXPORT_LIMIT)?;
        query.skip = 0;
        Ok(ExportRequest { opts, query })
    }
}

/// Exports every movie the listing filters keep.
pub fn export_movies(conn: &PgConnection, lists_dir: &Path, req: &ExportRequest) -> Result<Rendered, Error> {
    let page = action::list_movies(conn, lists_dir, &req.query)?;
    info!("exporting {} movies as {:?}", page.movies.len(), req.opts.format);

    let movies = page.movies.iter()
        .map(as_object)
        .collect::<Result<Vec<_>, Error>>()?;
    render(&movies, &req.opts, Utc::now())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn movies() -> Vec<Map<String, Value>> {
        let rows = vec![
            json!({"title": "Heat", "year": 1995, "director": "Michael Mann", "runtime": 170,
                   "genres": ["Crime", "Drama"], "notes": "a | b", "letterboxd_uri": "https://boxd.it/2bRu"}),
            json!({"title": "Stalker", "year": 1979, "director": null, "runtime": null,
                   "genres": [], "notes": "", "letterboxd_uri": "https://boxd.it/2b2A"}),
        ];
        rows.into_iter().map(|r| match r {
            Value::Object(m) => m,
            _ => unreachable!(),
        }).collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.ymd(2024, 3, 9).and_hms(12, 30, 0)
    }

    fn opts(query: &str) -> ExportOptions {
        ExportOptions::from_params(&QueryParams::parse(query).unwrap()).unwrap()
    }

    #[test]
    fn default_columns_include_notes() {
        assert_eq!(opts("").columns, vec!["title", "year", "director", "runtime", "genres", "notes"]);
        assert_eq!(opts("include_notes=false").columns.len(), 5);
        assert_eq!(opts("columns=title,%20year,").columns, vec!["title", "year"]);
        assert!(ExportOptions::from_params(&QueryParams::parse("format=xml").unwrap()).is_err());
    }

    #[test]
    fn export_request_validates_before_querying() {
        assert!(matches!(ExportRequest::parse("format=xml"), Err(Error::BadRequest(_))));
        assert!(ExportRequest::parse("year_min=soon").is_err());

        let req = ExportRequest::parse("format=json&skip=40&limit=10").unwrap();
        assert_eq!(req.opts.format, Format::Json);
        assert_eq!(req.query.skip, 0);
        assert_eq!(req.query.limit, 10);
        assert_eq!(ExportRequest::parse("").unwrap().query.limit, EXPORT_LIMIT);
    }

    #[test]
    fn renders_csv_with_joined_lists() {
        let out = render(&movies(), &opts("format=csv"), now()).unwrap();
        assert_eq!(out.filename, "movies-export-20240309.csv");
        assert_eq!(out.content_type, "text/csv");
        let lines: Vec<&str> = out.body.lines().collect();
        assert_eq!(lines[0], "title,year,director,runtime,genres,notes");
        assert_eq!(lines[1], "Heat,1995,Michael Mann,170,\"Crime, Drama\",a | b");
        assert_eq!(lines[2], "Stalker,1979,,,,");
    }

    #[test]
    fn renders_letterboxd_import_format() {
        let out = render(&movies(), &opts("format=letterboxd&columns=notes"), now()).unwrap();
        assert_eq!(out.filename, "letterboxd-export-20240309.csv");
        let lines: Vec<&str> = out.body.lines().collect();
        assert_eq!(lines[0], "Title,Year,Directors,LetterboxdURI");
        assert_eq!(lines[1], "Heat,1995,Michael Mann,https://boxd.it/2bRu");
    }

    #[test]
    fn renders_json_with_selected_columns() {
        let out = render(&movies(), &opts("format=json&columns=title,missing"), now()).unwrap();
        let body: Value = serde_json::from_str(&out.body).unwrap();
        assert_eq!(body, json!([
            {"title": "Heat", "missing": null},
            {"title": "Stalker", "missing": null},
        ]));
        assert_eq!(out.filename, "movies-export-20240309.json");
    }

    #[test]
    fn renders_markdown_table() {
        let out = render(&movies(), &opts("format=markdown&columns=title,notes"), now()).unwrap();
        assert!(out.body.starts_with("# Movies Export\n"));
        assert!(out.body.contains("Exported: 2024-03-09 12:30:00"));
        assert!(out.body.contains("Total: 2 movies"));
        assert!(out.body.contains("| title | notes |\n| --- | --- |"));
        assert!(out.body.contains("| Heat | a \\| b |"));
        assert_eq!(out.filename, "movies-export-20240309.md");
    }
}
