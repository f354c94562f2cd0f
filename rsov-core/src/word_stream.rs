//! Forward-only word streams used by the SPIR-V parser and serializer.

use crate::bail_format;
use crate::error::{Result, TranslateError};
use spirv::Word;

/// Sequential reader over an owned word buffer.
#[derive(Debug, Clone)]
pub struct InputWordStream {
    words: Vec<Word>,
    pos: usize,
}

impl InputWordStream {
    pub fn new(words: Vec<Word>) -> Self {
        InputWordStream { words, pos: 0 }
    }

    /// Build a stream from raw module bytes.
    ///
    /// Bytes are read little-endian unless the first word is the byte-swapped
    /// magic number, in which case every word is swapped.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            bail_format!("Module size {} is not a multiple of 4 bytes", bytes.len());
        }

        let mut words: Vec<Word> = bytes
            .chunks_exact(4)
            .map(|chunk| Word::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        if words.first() == Some(&spirv::MAGIC_NUMBER.swap_bytes()) {
            for word in &mut words {
                *word = word.swap_bytes();
            }
        }

        Ok(Self::new(words))
    }

    pub fn read(&mut self) -> Result<Word> {
        let word = *self.words.get(self.pos).ok_or(TranslateError::EndOfStream)?;
        self.pos += 1;
        Ok(word)
    }

    /// Read exactly `count` words, failing without consuming anything if the
    /// stream is shorter.
    pub fn read_n(&mut self, count: usize) -> Result<&[Word]> {
        if self.remaining() < count {
            return Err(TranslateError::EndOfStream);
        }
        let start = self.pos;
        self.pos += count;
        Ok(&self.words[start..self.pos])
    }

    pub fn remaining(&self) -> usize {
        self.words.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Number of words consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl From<Vec<Word>> for InputWordStream {
    fn from(words: Vec<Word>) -> Self {
        Self::new(words)
    }
}

/// Append-only word sink.
#[derive(Debug, Clone, Default)]
pub struct OutputWordStream {
    words: Vec<Word>,
}

impl OutputWordStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, word: Word) {
        self.words.push(word);
    }

    pub fn write_all(&mut self, words: &[Word]) {
        self.words.extend_from_slice(words);
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn into_words(self) -> Vec<Word> {
        self.words
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_past_end() {
        let mut stream = InputWordStream::new(vec![1, 2]);
        assert_eq!(stream.read(), Ok(1));
        assert_eq!(stream.read(), Ok(2));
        assert!(stream.is_empty());
        assert_eq!(stream.read(), Err(TranslateError::EndOfStream));
    }

    #[test]
    fn test_read_n_does_not_consume_on_failure() {
        let mut stream = InputWordStream::new(vec![7, 8, 9]);
        assert_eq!(stream.read_n(2).map(|w| w.to_vec()), Ok(vec![7, 8]));
        assert_eq!(stream.read_n(2), Err(TranslateError::EndOfStream));
        assert_eq!(stream.remaining(), 1);
        assert_eq!(stream.position(), 2);
    }

    #[test]
    fn test_from_bytes_little_endian() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x01, 0x00, 0x00, 0x00];
        let mut stream = InputWordStream::from_bytes(&bytes).unwrap();
        assert_eq!(stream.read(), Ok(spirv::MAGIC_NUMBER));
        assert_eq!(stream.read(), Ok(1));
    }

    #[test]
    fn test_from_bytes_big_endian_is_swapped() {
        let bytes = [0x07, 0x23, 0x02, 0x03, 0x00, 0x00, 0x00, 0x01];
        let mut stream = InputWordStream::from_bytes(&bytes).unwrap();
        assert_eq!(stream.read(), Ok(spirv::MAGIC_NUMBER));
        assert_eq!(stream.read(), Ok(1));
    }

    #[test]
    fn test_from_bytes_rejects_partial_word() {
        assert!(matches!(
            InputWordStream::from_bytes(&[1, 2, 3]),
            Err(TranslateError::FormatError(_))
        ));
    }

    #[test]
    fn test_output_bytes() {
        let mut out = OutputWordStream::new();
        out.write(0x0403_0201);
        out.write_all(&[5]);
        assert_eq!(out.len(), 2);
        assert_eq!(out.into_bytes(), vec![1, 2, 3, 4, 5, 0, 0, 0]);
    }
}
