//! # Data Loader Crate
//!
//! This crate turns CSV uploads into requests for the movie command bus.
//!
//! ## Main Components
//!
//! - **parser**: Parse movie and rating CSV content into protocol types
//! - **error**: Error types for data loading
//!
//! ## Example Usage
//!
//! ```ignore
//! use data_loader::parser;
//! use std::path::Path;
//!
//! let movies = parser::load_movies(Path::new("data/movies.csv"))?;
//! let ratings = parser::parse_ratings("1,31,2.5,1260759144")?;
//!
//! println!("{} movies, {} ratings", movies.len(), ratings.len());
//! ```
//!
//! ## Learning Goals
//!
//! 1. **Error Handling**: Using Result<T> and custom error types with line context
//! 2. **String Processing**: Splitting quoted CSV fields by hand
//! 3. **Parallel Processing**: Using Rayon for data-parallel parsing

// Public modules
pub mod error;
pub mod parser;

// Re-export commonly used items for convenience
pub use error::{DataLoadError, Result};
pub use parser::{load_movies, load_ratings, parse_movies, parse_ratings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports_parse_mixed_upload() {
        let movies = parse_movies("1,Heat (1995),Action|Crime|Thriller").unwrap();
        assert_eq!(movies[0].title, "Heat (1995)");

        let err = parse_ratings("userId,movieId,rating,timestamp\n1,2").unwrap_err();
        assert_eq!(err.line(), Some(2));
    }
}
