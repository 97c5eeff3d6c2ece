//! In-memory book catalog.
//!
//! Books are addressed by their zero-based position in the catalog. Insertion
//! order defines that position and is also the listing and storage order.
//! There is no removal operation; introducing one would shift every later
//! index and invalidate indices a client already holds.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A single library title.
///
/// Field order matches the key order of the persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    #[serde(rename = "titulo")]
    pub title: String,
    #[serde(rename = "autor")]
    pub author: String,
    #[serde(rename = "genero")]
    pub genre: String,
    /// Remaining copies available for rent
    #[serde(rename = "exemplares", deserialize_with = "copies::deserialize")]
    pub copies: i64,
}

impl Book {
    #[cfg(test)]
    pub fn new(
        author: impl Into<String>,
        title: impl Into<String>,
        genre: impl Into<String>,
        copies: i64,
    ) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            genre: genre.into(),
            copies,
        }
    }
}

impl fmt::Display for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Titulo: {} \nAutor: {} \nGenero: {} \nExemplares: {}\n\n",
            self.title, self.author, self.genre, self.copies
        )
    }
}

/// Domain failures reported back to the client as text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Index outside `[0, len)`
    #[error("index {0} is out of range")]
    InvalidIndex(i32),
    /// No copies left to rent
    #[error("book {0} has no copies available")]
    Unavailable(usize),
    /// Copy count already at `i64::MAX`
    #[error("book {0} cannot hold another copy")]
    CountOverflow(usize),
}

/// Ordered collection of books
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    books: Vec<Book>,
}

impl Catalog {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_books(books: Vec<Book>) -> Self {
        Self { books }
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn books(&self) -> &[Book] {
        &self.books
    }

    #[cfg(test)]
    pub fn get(&self, index: usize) -> Option<&Book> {
        self.books.get(index)
    }

    /// Every book paired with its current index, in storage order.
    pub fn list(&self) -> impl Iterator<Item = (usize, &Book)> {
        self.books.iter().enumerate()
    }

    /// Take one copy of the book at `index`.
    ///
    /// Refused (not clamped) when no copies remain.
    pub fn rent(&mut self, index: i32) -> Result<&Book, CatalogError> {
        let slot = self.resolve(index)?;
        let book = &mut self.books[slot];
        if book.copies <= 0 {
            return Err(CatalogError::Unavailable(slot));
        }
        book.copies -= 1;
        Ok(book)
    }

    /// Put one copy of the book at `index` back.
    ///
    /// Counts are not capped by the catalog; only `i64::MAX` itself is
    /// refused, leaving the book unchanged.
    pub fn give_back(&mut self, index: i32) -> Result<&Book, CatalogError> {
        let slot = self.resolve(index)?;
        let book = &mut self.books[slot];
        book.copies = book
            .copies
            .checked_add(1)
            .ok_or(CatalogError::CountOverflow(slot))?;
        Ok(book)
    }

    /// Append a book and return its index.
    ///
    /// Field contents are accepted as-is, including empty strings and
    /// negative copy counts.
    pub fn register(
        &mut self,
        author: String,
        title: String,
        genre: String,
        copies: i64,
    ) -> usize {
        self.books.push(Book {
            title,
            author,
            genre,
            copies,
        });
        self.books.len() - 1
    }

    fn resolve(&self, index: i32) -> Result<usize, CatalogError> {
        usize::try_from(index)
            .ok()
            .filter(|&slot| slot < self.books.len())
            .ok_or(CatalogError::InvalidIndex(index))
    }
}

/// Coercion of the stored `exemplares` number into a copy count.
mod copies {
    use serde::de::{Deserialize, Deserializer, Error};
    use serde_json::Number;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let number = Number::deserialize(deserializer)?;
        coerce(&number)
            .ok_or_else(|| D::Error::custom(format!("exemplares is not a copy count: {number}")))
    }

    /// Integral numbers within `i64` range, whether stored as `3` or `3.0`.
    fn coerce(number: &Number) -> Option<i64> {
        if let Some(n) = number.as_i64() {
            return Some(n);
        }
        // i64::MAX as f64 rounds up to 2^63, which is already out of range
        let n = number.as_f64()?;
        let in_range = n >= i64::MIN as f64 && n < i64::MAX as f64;
        (n.fract() == 0.0 && in_range).then_some(n as i64)
    }
}
