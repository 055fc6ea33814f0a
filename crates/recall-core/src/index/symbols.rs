//! Symbol table consumed from the indexing collaborator.

use std::collections::HashMap;

use crate::models::split_entity_id;

/// One indexed symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolEntry {
    pub name: String,
    pub kind: String,
    pub file: String,
    pub line: u32,
    pub exported: bool,
}

impl SymbolEntry {
    pub fn new(name: &str, kind: &str, file: &str, line: u32, exported: bool) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            file: file.to_string(),
            line,
            exported,
        }
    }
}

/// Append-only symbol table with name and file indexes.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    by_name: HashMap<String, Vec<usize>>,
    by_file: HashMap<String, Vec<usize>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch of any size. Capacity is reserved up front and entries
    /// are moved in one at a time, so batch size never touches the stack.
    pub fn append_batch<I>(&mut self, batch: I)
    where
        I: IntoIterator<Item = SymbolEntry>,
    {
        let iter = batch.into_iter();
        let (lower, _) = iter.size_hint();
        self.entries.reserve(lower);
        for entry in iter {
            let index = self.entries.len();
            self.by_name.entry(entry.name.clone()).or_default().push(index);
            self.by_file.entry(entry.file.clone()).or_default().push(index);
            self.entries.push(entry);
        }
    }

    pub fn push(&mut self, entry: SymbolEntry) {
        self.append_batch(std::iter::once(entry));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SymbolEntry] {
        &self.entries
    }

    pub fn by_name(&self, name: &str) -> impl Iterator<Item = &SymbolEntry> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .map(|&i| &self.entries[i])
    }

    pub fn in_file(&self, file: &str) -> impl Iterator<Item = &SymbolEntry> {
        self.by_file
            .get(file)
            .into_iter()
            .flatten()
            .map(|&i| &self.entries[i])
    }

    pub fn exported_count(&self) -> usize {
        self.entries.iter().filter(|e| e.exported).count()
    }

    /// Resolve the display name of an entity id against the table.
    ///
    /// Understands `kind:path#name`, `kind:path/name`, `kind:a::b::name`, and
    /// bare `kind:name` locators. File-level entities resolve to `None`.
    pub fn display_name_for(&self, entity_id: &str) -> Option<&str> {
        let (_, locator) = split_entity_id(entity_id);
        if let Some((file, name)) = locator.rsplit_once('#') {
            return self
                .by_name(name)
                .find(|e| e.file == file)
                .map(|e| e.name.as_str());
        }
        let tail = locator
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(locator);
        let tail = tail.rsplit("::").next().unwrap_or(tail);
        self.by_name(tail).next().map(|e| e.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SymbolTable {
        let mut table = SymbolTable::new();
        table.append_batch(vec![
            SymbolEntry::new("getStorage", "function", "src/storage/index.ts", 4, true),
            SymbolEntry::new("IStorage", "interface", "src/storage/types.ts", 1, true),
            SymbolEntry::new("helper", "function", "src/util.ts", 9, false),
        ]);
        table
    }

    #[test]
    fn test_append_and_lookup() {
        let table = table();
        assert_eq!(table.len(), 3);
        assert_eq!(table.exported_count(), 2);
        assert_eq!(table.by_name("helper").count(), 1);
        assert_eq!(table.in_file("src/storage/types.ts").next().unwrap().name, "IStorage");
    }

    #[test]
    fn test_large_batch_append() {
        let mut table = SymbolTable::new();
        let batch = (0..100_000).map(|i| SymbolEntry::new(&format!("sym_{i}"), "function", "big.ts", i, false));
        table.append_batch(batch);
        table.append_batch((0..50_000).map(|i| SymbolEntry::new(&format!("more_{i}"), "type", "more.ts", i, true)));
        assert_eq!(table.len(), 150_000);
        assert_eq!(table.by_name("sym_99999").next().unwrap().line, 99_999);
        assert_eq!(table.in_file("more.ts").count(), 50_000);
    }

    #[test]
    fn test_display_name_for_locators() {
        let table = table();
        assert_eq!(
            table.display_name_for("func:src/storage/index.ts#getStorage"),
            Some("getStorage")
        );
        assert_eq!(table.display_name_for("func:src/other.ts#getStorage"), None);
        assert_eq!(table.display_name_for("func:src/storage/getStorage"), Some("getStorage"));
        assert_eq!(table.display_name_for("type:storage::IStorage"), Some("IStorage"));
        assert_eq!(table.display_name_for("mod:src/storage/types.ts"), None);
    }
}
