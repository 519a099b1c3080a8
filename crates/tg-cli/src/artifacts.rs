use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tg_compiler::{plan_shards, CompileOptions, CompileReport, ListText, RuleCompiler};
use tg_core::schema::{rules_from_json, rules_to_json};
use tg_core::types::Rule;
use tg_core::Matcher;

#[derive(Debug, Clone)]
pub struct ShardOptions {
    pub namespace: String,
    pub max_rules_per_shard: usize,
    pub max_shards: usize,
    pub compile: CompileOptions,
}

#[derive(Debug, Clone)]
pub struct CompileStats {
    pub report: CompileReport,
    pub rules: usize,
    pub exceptions: usize,
    pub dropped_rules: usize,
    pub total_ms: f64,
}

/// A serialized shard ready to be written.
#[derive(Debug, Clone)]
pub struct ShardFile {
    pub identifier: String,
    pub rule_count: usize,
    pub json: String,
}

/// Compile list files into serialized shards. Every shard is read back
/// through the schema and the matcher before it is returned.
pub fn compile_shard_files(
    inputs: &[String],
    excluded: &BTreeSet<String>,
    options: &ShardOptions,
) -> Result<(Vec<ShardFile>, CompileStats), String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    let start = Instant::now();
    let mut lists = Vec::with_capacity(inputs.len());
    for path in inputs {
        let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
        let list_id = Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        lists.push(ListText { list_id, text: Some(text) });
    }

    let compiled = RuleCompiler::new(options.compile).compile(&lists, excluded);
    let plan = plan_shards(&compiled.rules, options.max_rules_per_shard, options.max_shards);

    let mut files = Vec::with_capacity(plan.shards.len());
    for (index, shard) in plan.shards.iter().enumerate() {
        let identifier = format!("{}_{}", options.namespace, index);
        let json = rules_to_json(shard).map_err(|e| format!("Failed to serialize '{}': {}", identifier, e))?;
        verify_artifact(&json).map_err(|e| format!("Generated shard '{}' failed validation: {}", identifier, e))?;
        files.push(ShardFile {
            identifier,
            rule_count: shard.len(),
            json,
        });
    }

    let stats = CompileStats {
        rules: compiled.rules.len(),
        exceptions: compiled.exception_count(),
        dropped_rules: plan.dropped_rules,
        report: compiled.report,
        total_ms: start.elapsed().as_secs_f64() * 1000.0,
    };

    Ok((files, stats))
}

/// Parse an artifact and build its matcher.
pub fn verify_artifact(json: &str) -> Result<Vec<Rule>, String> {
    let rules = rules_from_json(json).map_err(|e| e.to_string())?;
    Matcher::new(&rules).map_err(|e| e.to_string())?;
    Ok(rules)
}

pub fn write_shards(dir: &Path, files: &[ShardFile]) -> Result<Vec<PathBuf>, String> {
    fs::create_dir_all(dir).map_err(|e| format!("Failed to create '{}': {}", dir.display(), e))?;
    files
        .iter()
        .map(|file| {
            let path = dir.join(format!("{}.json", file.identifier));
            fs::write(&path, &file.json).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))?;
            Ok(path)
        })
        .collect()
}

pub fn read_artifact(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(max_rules_per_shard: usize) -> ShardOptions {
        ShardOptions {
            namespace: "shard".to_string(),
            max_rules_per_shard,
            max_shards: 10,
            compile: CompileOptions::default(),
        }
    }

    #[test]
    fn compiles_and_writes_shards() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("list.txt");
        let body: String = (0..120).map(|i| format!("||host{i}.test\n")).collect();
        fs::write(&list, body).unwrap();

        let inputs = vec![list.to_string_lossy().into_owned()];
        let (files, stats) = compile_shard_files(&inputs, &BTreeSet::new(), &options(100)).unwrap();
        assert!(files.len() > 1);
        assert!(files.iter().all(|f| f.rule_count <= 100));
        assert_eq!(stats.report.lists[0].list_id, "list");
        assert_eq!(stats.dropped_rules, 0);

        let out = dir.path().join("out");
        let paths = write_shards(&out, &files).unwrap();
        assert_eq!(paths[0], out.join("shard_0.json"));
        let rules = verify_artifact(&read_artifact(&paths[0]).unwrap()).unwrap();
        assert_eq!(rules.len(), files[0].rule_count);
    }

    #[test]
    fn missing_input_is_an_error() {
        let err = compile_shard_files(&["/nonexistent/list.txt".to_string()], &BTreeSet::new(), &options(100));
        assert!(err.unwrap_err().contains("Failed to read"));
        assert!(compile_shard_files(&[], &BTreeSet::new(), &options(100)).is_err());
    }

    #[test]
    fn rejects_invalid_artifacts() {
        assert!(verify_artifact("{}").is_err());
        assert!(verify_artifact(r#"[{"trigger":{"url-filter":"(("},"action":{"type":"block"}}]"#).is_err());
    }
}
