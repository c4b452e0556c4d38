//! Nested, indentation-delimited groups of diagnostic lines.

/// One logical entity in the transcoder's diagnostic output (an input, a
/// stream, a chapter, ...).
///
/// `name` is the block's first line with indentation removed. Lines found in
/// "Metadata:" sub-blocks are collapsed into `metadata` instead of becoming
/// children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StructuredBlock {
    pub name: String,
    pub indent: usize,
    pub metadata: Vec<(String, String)>,
    pub children: Vec<StructuredBlock>,
}

impl StructuredBlock {
    pub fn new(name: impl Into<String>, indent: usize) -> Self {
        Self {
            name: name.into(),
            indent,
            metadata: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Looks up a metadata value by key, ignoring ASCII case.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// First direct child whose name starts with `prefix`.
    pub fn child_starting_with(&self, prefix: &str) -> Option<&StructuredBlock> {
        self.children.iter().find(|c| c.name.starts_with(prefix))
    }

    /// All blocks below this one, depth first in document order.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }
}

/// Iterator returned by [`StructuredBlock::descendants`].
pub struct Descendants<'a> {
    stack: Vec<&'a StructuredBlock>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a StructuredBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.stack.pop()?;
        self.stack.extend(block.children.iter().rev());
        Some(block)
    }
}
