//! Collision-resistant, engine-legal names for isolation units.
//!
//! A generated name is a sanitized, human readable seed (normally the test name) followed by
//! a short random suffix. The suffix always comes last so that truncating a long seed never
//! eats into the part that makes the name unique.

use std::borrow::Cow;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pg_escape::quote_identifier;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::bail;
use crate::error::{ErrorKind, IsolationResult};

/// Maximum identifier length in bytes. Postgres truncates anything longer, which can be less
/// than 63 characters with multibyte encodings.
pub const MAX_IDENTIFIER_LENGTH: usize = config::shared::MAX_IDENTIFIER_LENGTH;

/// Number of random bytes in a generated identifier, 48 bits once encoded.
const RANDOM_SUFFIX_BYTES: usize = 6;

/// Number of random bytes in a lower-cased identifier. Folding the encoded suffix to lower case
/// leaves 38 symbols per character, so 12 characters keep about 63 bits.
const RANDOM_SUFFIX_BYTES_LOWERCASE: usize = 9;

/// Separator placed between the sanitized seed and the random suffix.
const SEPARATOR: char = '-';

/// Letter case applied to generated identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LetterCase {
    Preserve,
    /// Lower-cases the whole identifier, random suffix included.
    ///
    /// Required for names used in a `search_path`: unquoted search path entries are folded to
    /// lower case by the server, so a mixed-case schema name is not found. The suffix is drawn
    /// from more random bytes to make up for the folded letters.
    Lower,
}

impl LetterCase {
    fn random_suffix_bytes(self) -> usize {
        match self {
            LetterCase::Preserve => RANDOM_SUFFIX_BYTES,
            LetterCase::Lower => RANDOM_SUFFIX_BYTES_LOWERCASE,
        }
    }
}

/// Generates unique identifiers from human readable seeds.
#[derive(Debug, Clone, Copy)]
pub struct IdentifierGenerator {
    max_length: usize,
    case: LetterCase,
}

impl IdentifierGenerator {
    /// Creates a generator producing identifiers of at most `max_length` bytes.
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            case: LetterCase::Preserve,
        }
    }

    /// Returns a generator that lower-cases every identifier it produces.
    pub fn lowercase(self) -> Self {
        Self {
            case: LetterCase::Lower,
            ..self
        }
    }

    /// Generates a new identifier for `seed` using the operating system's entropy source.
    ///
    /// Fails with [`ErrorKind::RandomSourceUnavailable`] if the entropy source cannot be read.
    /// There is no fallback: a deterministic name could collide with a live unit.
    pub fn generate(&self, seed: &str) -> IsolationResult<Identifier> {
        self.generate_with_rng(seed, &mut OsRng)
    }

    /// Generates a new identifier for `seed` drawing the random suffix from `rng`.
    pub fn generate_with_rng<R>(&self, seed: &str, rng: &mut R) -> IsolationResult<Identifier>
    where
        R: RngCore + ?Sized,
    {
        let mut buffer = [0u8; RANDOM_SUFFIX_BYTES_LOWERCASE];
        let random = &mut buffer[..self.case.random_suffix_bytes()];
        rng.try_fill_bytes(random)?;

        let mut suffix = URL_SAFE_NO_PAD.encode(random);
        if self.case == LetterCase::Lower {
            suffix.make_ascii_lowercase();
        }

        let Some(max_seed_length) = self
            .max_length
            .checked_sub(suffix.len() + SEPARATOR.len_utf8())
        else {
            bail!(
                ErrorKind::InvalidIdentifier,
                "Identifier length limit is too small for the random suffix",
                format!("limit is {} bytes", self.max_length)
            );
        };

        let mut name = sanitize_seed(seed, self.case, max_seed_length);
        if !name.ends_with(SEPARATOR) {
            name.push(SEPARATOR);
        }
        name.push_str(&suffix);

        Ok(Identifier(name))
    }
}

impl Default for IdentifierGenerator {
    fn default() -> Self {
        Self::new(MAX_IDENTIFIER_LENGTH)
    }
}

/// Replaces every run of non-alphanumeric characters with a single separator and stops before
/// the output would exceed `max_length` bytes.
fn sanitize_seed(seed: &str, case: LetterCase, max_length: usize) -> String {
    let mut output = String::with_capacity(max_length);
    let mut last_was_separator = false;

    for ch in seed.chars() {
        let piece: Cow<'_, str> = if ch.is_alphanumeric() {
            last_was_separator = false;
            match case {
                LetterCase::Preserve => Cow::Owned(ch.to_string()),
                // Some lower-case mappings add combining marks, which are not alphanumeric.
                LetterCase::Lower => Cow::Owned(
                    ch.to_lowercase()
                        .filter(|lower| lower.is_alphanumeric())
                        .collect(),
                ),
            }
        } else if last_was_separator {
            continue;
        } else {
            last_was_separator = true;
            Cow::Borrowed("-")
        };

        if output.len() + piece.len() > max_length {
            break;
        }
        output.push_str(&piece);
    }

    output
}

/// Returns `true` for characters allowed in generated identifiers.
fn is_identifier_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '-' || ch == '_'
}

/// A validated name of an isolation unit.
///
/// Only Unicode letters and digits, `-` and `_` are allowed, and the name fits in
/// [`MAX_IDENTIFIER_LENGTH`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Generates a new identifier for `seed` with the default generator.
    pub fn generate(seed: &str) -> IsolationResult<Identifier> {
        IdentifierGenerator::default().generate(seed)
    }

    /// Generates a new lower-cased identifier for `seed` with the default generator.
    pub fn generate_lowercase(seed: &str) -> IsolationResult<Identifier> {
        IdentifierGenerator::default().lowercase().generate(seed)
    }

    /// Validates an existing name.
    pub fn parse(name: &str) -> IsolationResult<Identifier> {
        if name.is_empty() {
            bail!(ErrorKind::InvalidIdentifier, "Identifier is empty");
        }

        if name.len() > MAX_IDENTIFIER_LENGTH {
            bail!(
                ErrorKind::InvalidIdentifier,
                "Identifier exceeds the maximum length",
                format!("{name} is {} bytes long", name.len())
            );
        }

        if let Some(invalid) = name.chars().find(|ch| !is_identifier_char(*ch)) {
            bail!(
                ErrorKind::InvalidIdentifier,
                "Identifier contains a character outside the allowed alphabet",
                format!("{invalid:?} in {name}")
            );
        }

        Ok(Identifier(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the identifier quoted for use in a SQL statement.
    pub fn quoted(&self) -> String {
        quote_identifier(&self.0).to_string()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Quotes an arbitrary configured name (e.g. the reference database) for use in a SQL statement.
///
/// Unlike [`Identifier::parse`] any character is accepted and escaped, but the name must be
/// non-empty, must not contain NUL and must fit in [`MAX_IDENTIFIER_LENGTH`] bytes, since the
/// server would otherwise silently truncate it and refer to a different object.
pub fn quote_name(name: &str) -> IsolationResult<String> {
    if name.is_empty() || name.contains('\0') {
        bail!(
            ErrorKind::InvalidIdentifier,
            "Name is empty or contains NUL",
            format!("{name:?}")
        );
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        bail!(
            ErrorKind::InvalidIdentifier,
            "Name exceeds the maximum identifier length",
            format!("{name} is {} bytes long", name.len())
        );
    }

    Ok(quote_identifier(name).to_string())
}
