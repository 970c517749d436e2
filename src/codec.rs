use crate::error::{Result, TextGenError};
use crate::tensor::Tensor;

/// Reserved id for characters outside the supported set (also used as padding).
pub const UNKNOWN_ID: usize = 0;

/// Character produced when decoding [`UNKNOWN_ID`].
pub const UNKNOWN_CHAR: char = '\u{FFFD}';

/// Number of ids: 97 supported characters plus the reserved unknown id.
pub const VOCAB_SIZE: usize = 98;

/// The supported characters in id order: tab, newline, then printable ASCII `' '..='~'`.
fn supported_chars() -> impl Iterator<Item = char> {
    ['\t', '\n'].into_iter().chain(' '..='~')
}

/// Bidirectional mapping between characters and symbol ids.
///
/// The vocabulary is fixed and independent of any corpus, so every model
/// trained with this codec shares the same ids.
#[derive(Debug, Clone)]
pub struct SymbolCodec {
    char_to_id: [usize; 128], // ASCII lookup; everything else is unknown
    id_to_char: Vec<char>,
}

impl Default for SymbolCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolCodec {
    /// Builds the codec. Ids are assigned in ascending code point order starting at 1.
    pub fn new() -> Self {
        let mut char_to_id = [UNKNOWN_ID; 128];
        let mut id_to_char = vec![UNKNOWN_CHAR];
        for ch in supported_chars() {
            char_to_id[ch as usize] = id_to_char.len();
            id_to_char.push(ch);
        }
        debug_assert_eq!(id_to_char.len(), VOCAB_SIZE);
        Self {
            char_to_id,
            id_to_char,
        }
    }

    /// Vocabulary size `V`; valid ids are `0..V`.
    pub fn vocab_size(&self) -> usize {
        self.id_to_char.len()
    }

    /// Id of a single character, `UNKNOWN_ID` if unsupported.
    pub fn encode_char(&self, ch: char) -> usize {
        self.char_to_id
            .get(ch as usize)
            .copied()
            .unwrap_or(UNKNOWN_ID)
    }

    /// Encodes every character of `text`. Total: unsupported characters become `UNKNOWN_ID`.
    pub fn encode(&self, text: &str) -> Vec<usize> {
        text.chars().map(|ch| self.encode_char(ch)).collect()
    }

    /// Character for a single id.
    pub fn decode_id(&self, id: usize) -> Result<char> {
        self.id_to_char
            .get(id)
            .copied()
            .ok_or(TextGenError::Decode {
                id,
                vocab_size: self.vocab_size(),
            })
    }

    /// Decodes ids back to text. Fails on the first id outside `[0, V)`.
    pub fn decode(&self, ids: &[usize]) -> Result<String> {
        ids.iter().map(|&id| self.decode_id(id)).collect()
    }
}

/// Expands an id tensor of shape `S` into a one-hot tensor of shape `S + [num_classes]`.
pub fn one_hot(ids: &Tensor<usize>, num_classes: usize) -> Result<Tensor<f32>> {
    let mut blob = vec![0.0f32; ids.size() * num_classes];
    for (i, &id) in ids.blob().iter().enumerate() {
        if id >= num_classes {
            return Err(TextGenError::Decode {
                id,
                vocab_size: num_classes,
            });
        }
        blob[i * num_classes + id] = 1.0;
    }
    let mut shape = ids.shape().to_vec();
    shape.push(num_classes);
    Ok(Tensor::raw(&shape, blob)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_layout() {
        let codec = SymbolCodec::new();
        assert_eq!(codec.vocab_size(), VOCAB_SIZE);
        assert_eq!(codec.encode_char('\t'), 1);
        assert_eq!(codec.encode_char('\n'), 2);
        assert_eq!(codec.encode_char(' '), 3);
        assert_eq!(codec.encode_char('~'), 97);
        assert_eq!(codec.encode_char('\r'), UNKNOWN_ID);
        assert_eq!(codec.encode_char('\x0b'), UNKNOWN_ID);
        assert_eq!(codec.encode_char('é'), UNKNOWN_ID);
    }

    #[test]
    fn round_trip_supported_text() {
        let codec = SymbolCodec::new();
        let text = "Hello,\tworld!\n{[(~)]} 0123456789 `quoted` \\ \"";
        assert_eq!(codec.decode(&codec.encode(text)).unwrap(), text);
    }

    #[test]
    fn unknown_characters_collapse_to_zero() {
        let codec = SymbolCodec::new();
        assert_eq!(codec.encode("a\r€b"), vec![codec.encode_char('a'), 0, 0, codec.encode_char('b')]);
        assert_eq!(codec.decode(&[0]).unwrap(), UNKNOWN_CHAR.to_string());
    }

    #[test]
    fn decode_rejects_out_of_range_ids() {
        let codec = SymbolCodec::new();
        match codec.decode(&[5, VOCAB_SIZE]) {
            Err(TextGenError::Decode { id, vocab_size }) => {
                assert_eq!(id, VOCAB_SIZE);
                assert_eq!(vocab_size, VOCAB_SIZE);
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn one_hot_appends_class_axis() {
        let ids = Tensor::raw(&[2, 2], vec![0, 3, 2, 1]).unwrap();
        let expanded = one_hot(&ids, 4).unwrap();
        assert_eq!(expanded.shape(), &[2, 2, 4]);
        assert_eq!(expanded.row(&[0, 1]).unwrap(), &[0.0, 0.0, 0.0, 1.0]);
        assert_eq!(expanded.row(&[1, 1]).unwrap(), &[0.0, 1.0, 0.0, 0.0]);
        assert!(one_hot(&ids, 3).is_err());
    }
}
