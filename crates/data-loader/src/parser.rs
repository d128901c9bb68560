//! Parser for CSV uploads.
//!
//! Two formats are accepted:
//! - movies: `movieId,title,genres`
//! - ratings: `userId,movieId,rating,timestamp`
//!
//! A leading header row is skipped. Titles containing commas may be quoted
//! (`"Shawshank Redemption, The (1994)"`), with `""` as an escaped quote.
//!
//! Rust concepts you'll learn here:
//! - String parsing and splitting
//! - Error handling with `?` operator
//! - Data-parallel parsing with Rayon while keeping input order

use std::fs;
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, info};

use protocol::{MovieId, MoviePayload, Rating, RATING_RANGE};

use crate::error::{DataLoadError, Result};

const MOVIES_FILE: &str = "movies.csv";
const RATINGS_FILE: &str = "ratings.csv";

/// Read a file into a string, replacing invalid UTF-8
fn read_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(DataLoadError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Number the non-empty lines of `content` (1-based) and drop a header row.
fn data_lines(content: &str) -> Vec<(usize, &str)> {
    let mut lines: Vec<(usize, &str)> = content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .collect();

    if lines.first().is_some_and(|(_, first)| is_header(first)) {
        let (_, header) = lines.remove(0);
        debug!(header, "Skipping header row");
    }
    lines
}

/// A header row starts with a column name rather than a number
fn is_header(line: &str) -> bool {
    let first = line.split(',').next().unwrap_or("").trim().trim_matches('"');
    !first.is_empty() && first.parse::<f64>().is_err()
}

/// Split one CSV line into fields, honouring double quotes.
///
/// Fields are returned untrimmed so a title split on an unquoted comma can
/// be rejoined exactly.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn parse_field<T: std::str::FromStr>(value: &str, name: &str, file: &str, line: usize) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| DataLoadError::ParseError {
        file: file.to_string(),
        line,
        reason: format!("Invalid {}: {}", name, e),
    })
}

/// Parse one movie row
///
/// Format: movieId,title,genres
///
/// A blank id is kept as `None` so the emitter can reject it explicitly.
/// An unquoted title that contains commas is rejoined: the first field is
/// the id, the last is the genres, everything between is the title.
pub fn parse_movie_line(line_no: usize, line: &str) -> Result<MoviePayload> {
    let fields = split_csv_line(line);
    if fields.len() < 3 {
        return Err(DataLoadError::FieldCountMismatch {
            expected: 3,
            found: fields.len(),
            line: line_no,
        });
    }

    let id = match fields[0].trim() {
        "" => None,
        raw => Some(parse_field::<MovieId>(raw, "movieId", MOVIES_FILE, line_no)?),
    };
    let last = fields.len() - 1;

    Ok(MoviePayload {
        id,
        title: fields[1..last].join(",").trim().to_string(),
        genres: fields[last].trim().to_string(),
    })
}

/// Parse one rating row
///
/// Format: userId,movieId,rating,timestamp
pub fn parse_rating_line(line_no: usize, line: &str) -> Result<Rating> {
    let fields = split_csv_line(line);
    if fields.len() < 4 {
        return Err(DataLoadError::FieldCountMismatch {
            expected: 4,
            found: fields.len(),
            line: line_no,
        });
    }

    let rating: f32 = parse_field(&fields[2], "rating", RATINGS_FILE, line_no)?;
    if !RATING_RANGE.contains(&rating) {
        return Err(DataLoadError::InvalidValue {
            field: "rating".to_string(),
            value: fields[2].clone(),
            line: line_no,
        });
    }

    Ok(Rating {
        user_id: parse_field(&fields[0], "userId", RATINGS_FILE, line_no)?,
        movie_id: parse_field(&fields[1], "movieId", RATINGS_FILE, line_no)?,
        rating,
        timestamp: parse_field(&fields[3], "timestamp", RATINGS_FILE, line_no)?,
    })
}

/// Parse the contents of a movie upload.
///
/// Rust concept: `par_iter` over an indexed `Vec` followed by `collect`
/// keeps the original order, and collecting into `Result<Vec<_>>` stops at
/// the first error.
pub fn parse_movies(content: &str) -> Result<Vec<MoviePayload>> {
    let lines = data_lines(content);
    if lines.is_empty() {
        return Err(DataLoadError::Empty);
    }
    let movies = lines
        .par_iter()
        .map(|(line_no, line)| parse_movie_line(*line_no, line))
        .collect::<Result<Vec<_>>>()?;
    info!("Parsed {} movies", movies.len());
    Ok(movies)
}

/// Parse the contents of a rating upload
pub fn parse_ratings(content: &str) -> Result<Vec<Rating>> {
    let lines = data_lines(content);
    if lines.is_empty() {
        return Err(DataLoadError::Empty);
    }
    let ratings = lines
        .par_iter()
        .map(|(line_no, line)| parse_rating_line(*line_no, line))
        .collect::<Result<Vec<_>>>()?;
    info!("Parsed {} ratings", ratings.len());
    Ok(ratings)
}

/// Load and parse a movie CSV file
pub fn load_movies(path: &Path) -> Result<Vec<MoviePayload>> {
    parse_movies(&read_file(path)?)
}

/// Load and parse a rating CSV file
pub fn load_ratings(path: &Path) -> Result<Vec<Rating>> {
    parse_ratings(&read_file(path)?)
}
