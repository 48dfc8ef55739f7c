//! Per-server cache of tool descriptors plus a derived keyword search index.
//!
//! Entries are built once per server (on [`ToolCatalog::ensure`]) and never
//! evicted: the catalog grows monotonically for the lifetime of the bridge.
//! Reads go through an [`ArcSwap`] snapshot of the flattened search index so
//! concurrent `search`/`docs` calls never see a half-built entry, mirroring
//! the lock-free-read registry pattern used for routing tables elsewhere in
//! this corpus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::error::BridgeError;
use crate::spec::{DocDetail, ServerMetadata, ToolDescriptor};

/// `{alias → descriptor, raw_name → descriptor}`, both lower-cased keys, so
/// resolution is case-insensitive on either name.
#[derive(Debug, Clone, Default)]
struct IdentifierIndex {
    by_key: HashMap<String, usize>,
}

impl IdentifierIndex {
    fn build(tools: &[ToolDescriptor]) -> Self {
        let mut by_key = HashMap::new();
        for (idx, tool) in tools.iter().enumerate() {
            by_key.insert(tool.alias.to_lowercase(), idx);
            by_key.insert(tool.raw_name.to_lowercase(), idx);
        }
        Self { by_key }
    }

    fn resolve<'a>(&self, tools: &'a [ToolDescriptor], name: &str) -> Option<&'a ToolDescriptor> {
        self.by_key.get(&name.to_lowercase()).map(|&idx| &tools[idx])
    }
}

#[derive(Debug, Clone)]
struct ServerCatalogEntry {
    server_name: String,
    server_alias: String,
    tools: Vec<ToolDescriptor>,
    identifier_index: IdentifierIndex,
}

#[derive(Debug, Clone)]
struct SearchEntry {
    server_name: String,
    server_alias: String,
    descriptor: ToolDescriptor,
    keywords: String,
}

fn keyword_blob(server_name: &str, server_alias: &str, tool: &ToolDescriptor) -> String {
    format!(
        "{} {} {} {} {}",
        server_name, server_alias, tool.raw_name, tool.alias, tool.description
    )
    .to_lowercase()
}

fn assign_alias(raw_name: &str, taken: &mut HashMap<String, u32>) -> String {
    let mut base: String = raw_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    base = base.to_lowercase();
    if base.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        base = format!("_{base}");
    }
    if base.is_empty() {
        base = "_".to_string();
    }

    let count = taken.entry(base.clone()).or_insert(0);
    let alias = if *count == 0 {
        base.clone()
    } else {
        format!("{base}_{count}")
    };
    *count += 1;
    alias
}

/// One server's tools as the downstream session reports them, before alias
/// assignment. This is what a [`crate::client_pool::ClientSession`] hands
/// the catalog on `ensure`.
#[derive(Debug, Clone)]
pub struct RawToolList {
    pub server_name: String,
    pub tools: Vec<(String, String, Option<serde_json::Value>)>,
}

pub struct ToolCatalog {
    entries: DashMap<String, Arc<ServerCatalogEntry>>,
    search_index: ArcSwap<Vec<SearchEntry>>,
    dirty: AtomicBool,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            search_index: ArcSwap::from_pointee(Vec::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Build (or confirm already built) the catalog entry for one server.
    /// Idempotent: calling this twice for the same server with the same raw
    /// tool list yields identical aliases, because alias assignment runs
    /// fresh each time from the raw list rather than mutating in place.
    pub fn ensure(&self, raw: RawToolList) {
        if self.entries.contains_key(&raw.server_name) {
            return;
        }

        let server_alias = format!(
            "mcp_{}",
            raw.server_name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect::<String>()
                .to_lowercase()
        );

        let mut taken = HashMap::new();
        let tools: Vec<ToolDescriptor> = raw
            .tools
            .into_iter()
            .map(|(raw_name, description, input_schema)| ToolDescriptor {
                alias: assign_alias(&raw_name, &mut taken),
                raw_name,
                description,
                input_schema,
            })
            .collect();

        let identifier_index = IdentifierIndex::build(&tools);

        self.entries.insert(
            raw.server_name.clone(),
            Arc::new(ServerCatalogEntry {
                server_name: raw.server_name,
                server_alias,
                tools,
                identifier_index,
            }),
        );
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Deep-copied metadata for an invocation to ship into the sandbox.
    pub fn snapshot(&self, name: &str) -> Option<ServerMetadata> {
        self.entries.get(name).map(|entry| ServerMetadata {
            server_name: entry.server_name.clone(),
            server_alias: entry.server_alias.clone(),
            tools: entry.tools.clone(),
        })
    }

    fn strip_schema(mut descriptor: ToolDescriptor, detail: DocDetail) -> ToolDescriptor {
        if detail == DocDetail::Summary {
            descriptor.input_schema = None;
        }
        descriptor
    }

    pub fn docs(
        &self,
        name: &str,
        tool: Option<&str>,
        detail: DocDetail,
    ) -> Result<Vec<ToolDescriptor>, BridgeError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| BridgeError::not_found(format!("server '{name}'")))?;

        match tool {
            Some(tool_name) => {
                let descriptor = entry
                    .identifier_index
                    .resolve(&entry.tools, tool_name)
                    .cloned()
                    .ok_or_else(|| BridgeError::not_found(format!("tool '{tool_name}'")))?;
                Ok(vec![Self::strip_schema(descriptor, detail)])
            }
            None => Ok(entry
                .tools
                .iter()
                .cloned()
                .map(|d| Self::strip_schema(d, detail))
                .collect()),
        }
    }

    fn rebuild_search_index_if_dirty(&self) {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut flat = Vec::new();
        for entry in self.entries.iter() {
            for tool in &entry.tools {
                flat.push(SearchEntry {
                    server_name: entry.server_name.clone(),
                    server_alias: entry.server_alias.clone(),
                    keywords: keyword_blob(&entry.server_name, &entry.server_alias, tool),
                    descriptor: tool.clone(),
                });
            }
        }
        self.search_index.store(Arc::new(flat));
    }

    /// Tokenise `query` on whitespace, lower-case, and return the first
    /// `limit` descriptors (clamped to `[1, 20]`) from servers in
    /// `allowed_servers` whose keyword blob contains every token.
    pub fn search(
        &self,
        query: &str,
        allowed_servers: &[String],
        limit: usize,
        detail: DocDetail,
    ) -> Vec<ToolDescriptor> {
        self.rebuild_search_index_if_dirty();
        let limit = limit.clamp(1, 20);
        let tokens: Vec<String> = query.to_lowercase().split_whitespace().map(String::from).collect();
        let index = self.search_index.load();

        index
            .iter()
            .filter(|entry| allowed_servers.iter().any(|s| s == &entry.server_name))
            .filter(|entry| tokens.iter().all(|t| entry.keywords.contains(t.as_str())))
            .take(limit)
            .map(|entry| Self::strip_schema(entry.descriptor.clone(), detail))
            .collect()
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(server: &str, tools: &[&str]) -> RawToolList {
        RawToolList {
            server_name: server.to_string(),
            tools: tools
                .iter()
                .map(|t| (t.to_string(), format!("does {t}"), None))
                .collect(),
        }
    }

    #[test]
    fn alias_assignment_is_deterministic_and_collision_free() {
        let catalog = ToolCatalog::new();
        catalog.ensure(sample("stub", &["Read File", "read_file", "123abc"]));
        let snap = catalog.snapshot("stub").unwrap();
        let aliases: Vec<&str> = snap.tools.iter().map(|t| t.alias.as_str()).collect();
        assert_eq!(aliases, vec!["read_file", "read_file_1", "_123abc"]);
    }

    #[test]
    fn ensure_twice_is_idempotent() {
        let catalog = ToolCatalog::new();
        catalog.ensure(sample("stub", &["echo"]));
        let first = catalog.snapshot("stub").unwrap();
        catalog.ensure(sample("stub", &["echo"]));
        let second = catalog.snapshot("stub").unwrap();
        assert_eq!(first.tools[0].alias, second.tools[0].alias);
    }

    #[test]
    fn docs_resolves_case_insensitively_by_alias_or_raw_name() {
        let catalog = ToolCatalog::new();
        catalog.ensure(sample("stub", &["Echo"]));
        assert!(catalog.docs("stub", Some("ECHO"), DocDetail::Summary).is_ok());
        assert!(catalog.docs("stub", Some("echo"), DocDetail::Summary).is_ok());
    }

    #[test]
    fn docs_unknown_tool_is_not_found() {
        let catalog = ToolCatalog::new();
        catalog.ensure(sample("stub", &["echo"]));
        let result = catalog.docs("stub", Some("missing"), DocDetail::Summary);
        assert!(matches!(result, Err(BridgeError::NotFound(_))));
    }

    #[test]
    fn search_clamps_limit_and_filters_by_allowed_servers() {
        let catalog = ToolCatalog::new();
        catalog.ensure(sample("stub", &["read_file", "write_file"]));
        catalog.ensure(sample("other", &["read_file"]));

        let results = catalog.search("file", &["stub".to_string()], 100, DocDetail::Summary);
        assert!(results.len() <= 20);
        assert!(results.iter().all(|d| d.alias.contains("file")));

        let scoped = catalog.search("read", &["stub".to_string()], 5, DocDetail::Summary);
        assert_eq!(scoped.len(), 1);
    }

    #[test]
    fn search_requires_all_tokens_present() {
        let catalog = ToolCatalog::new();
        catalog.ensure(sample("stub", &["read_file"]));
        let hits = catalog.search("read nonexistentterm", &["stub".to_string()], 10, DocDetail::Summary);
        assert!(hits.is_empty());
    }

    #[test]
    fn summary_detail_omits_input_schema() {
        let catalog = ToolCatalog::new();
        let tools = vec![ToolDescriptor {
            raw_name: "echo".into(),
            alias: "echo".into(),
            description: "echo".into(),
            input_schema: Some(serde_json::json!({"type": "object"})),
        }];
        let identifier_index = IdentifierIndex::build(&tools);
        catalog.entries.insert(
            "stub".into(),
            Arc::new(ServerCatalogEntry {
                server_name: "stub".into(),
                server_alias: "mcp_stub".into(),
                tools,
                identifier_index,
            }),
        );
        let docs = catalog.docs("stub", Some("echo"), DocDetail::Summary).unwrap();
        assert!(docs[0].input_schema.is_none());
    }
}
