//! Random string generation for dynamic tags

use rand::Rng;

/// Longest random string a tag may ask for
pub const MAX_RANDOM_LEN: usize = 1024;

const DIGITS: &str = "0123456789";
const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const SYMBOLS: &str = r##"!@#$%^&*()-_=+[]{};:'",.<>/?~`|"##;
const ALNUM: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const LOWER_DIGITS: &str = "abcdefghijklmnopqrstuvwxyz0123456789";
const UPPER_DIGITS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// The closed set of charset families usable in `rnd`/`bnd` tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// `n` - digits
    Digits,
    /// `a` - letters and digits
    Alnum,
    /// `l` - lowercase letters
    Lower,
    /// `u` - uppercase letters
    Upper,
    /// `s` - symbols
    Symbols,
    /// `lu` - mixed-case letters
    Letters,
    /// `ln` - lowercase letters and digits
    LowerDigits,
    /// `un` - uppercase letters and digits
    UpperDigits,
}

impl Charset {
    /// Look up a charset by its tag key
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "n" => Some(Self::Digits),
            "a" => Some(Self::Alnum),
            "l" => Some(Self::Lower),
            "u" => Some(Self::Upper),
            "s" => Some(Self::Symbols),
            "lu" => Some(Self::Letters),
            "ln" => Some(Self::LowerDigits),
            "un" => Some(Self::UpperDigits),
            _ => None,
        }
    }

    /// The alphabet this family draws from
    #[must_use]
    pub const fn alphabet(self) -> &'static str {
        match self {
            Self::Digits => DIGITS,
            Self::Alnum => ALNUM,
            Self::Lower => LOWER,
            Self::Upper => UPPER,
            Self::Symbols => SYMBOLS,
            Self::Letters => LETTERS,
            Self::LowerDigits => LOWER_DIGITS,
            Self::UpperDigits => UPPER_DIGITS,
        }
    }
}

/// Generate a random string of `len` characters from the given family
#[must_use]
pub fn random_string(len: usize, charset: Charset) -> String {
    let alphabet = charset.alphabet().as_bytes();
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(alphabet[rng.random_range(0..alphabet.len())]))
        .collect()
}
