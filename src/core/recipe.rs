//! FR-008: Recipe loading — the loader seam the compiler depends on.
//!
//! The compiler never reaches for a global registry. Callers hand it a
//! [`RecipeLoader`]: a directory of TOML files in production, an in-memory
//! map in tests.

use super::error::Error;
use super::parser;
use super::types::Recipe;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Source of recipes by tool name.
pub trait RecipeLoader {
    fn get(&self, name: &str) -> Result<Recipe, Error>;

    /// Forget memoized recipes so the next `get` re-reads its source.
    fn clear_cache(&self);
}

/// Tool names become file names, so they are restricted.
pub fn validate_tool_name(name: &str) -> Result<(), Error> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid tool name {:?}", name)))
    }
}

/// Split `tool@version`. The version part may be absent.
pub fn split_tool_spec(spec: &str) -> (&str, Option<&str>) {
    match spec.split_once('@') {
        Some((tool, version)) if !version.is_empty() => (tool, Some(version)),
        Some((tool, _)) => (tool, None),
        None => (spec, None),
    }
}

/// `<dir>/<name>.toml`, parsed once per process.
#[derive(Debug)]
pub struct DirRecipeLoader {
    dir: PathBuf,
    memo: RefCell<HashMap<String, Recipe>>,
}

impl DirRecipeLoader {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            memo: RefCell::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every recipe name available in the directory, sorted.
    pub fn names(&self) -> Result<Vec<String>, Error> {
        let pattern = self.dir.join("*.toml");
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern).map_err(|e| Error::Io(format!("bad recipe glob {}: {}", pattern, e)))?;
        let mut names: Vec<String> = paths
            .filter_map(Result::ok)
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }
}

impl RecipeLoader for DirRecipeLoader {
    fn get(&self, name: &str) -> Result<Recipe, Error> {
        validate_tool_name(name)?;
        if let Some(recipe) = self.memo.borrow().get(name) {
            return Ok(recipe.clone());
        }
        let path = self.dir.join(format!("{}.toml", name));
        if !path.exists() {
            return Err(Error::not_found("recipe", name));
        }
        let recipe = parser::parse_recipe_file(&path)?;
        if recipe.name() != name {
            return Err(Error::Validation(format!(
                "{} declares name '{}', expected '{}'",
                path.display(),
                recipe.name(),
                name
            )));
        }
        tracing::debug!(recipe = name, path = %path.display(), "loaded recipe");
        self.memo.borrow_mut().insert(name.to_string(), recipe.clone());
        Ok(recipe)
    }

    fn clear_cache(&self) {
        self.memo.borrow_mut().clear();
    }
}

/// Recipes held in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryRecipeLoader {
    recipes: HashMap<String, Recipe>,
}

impl MemoryRecipeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, recipe: Recipe) -> Self {
        self.recipes.insert(recipe.name().to_string(), recipe);
        self
    }

    /// Parse and add a TOML recipe.
    pub fn with_toml(self, toml_text: &str) -> Result<Self, Error> {
        Ok(self.with(parser::parse_recipe(toml_text)?))
    }
}

impl RecipeLoader for MemoryRecipeLoader {
    fn get(&self, name: &str) -> Result<Recipe, Error> {
        self.recipes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("recipe", name))
    }

    fn clear_cache(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    const JQ: &str = "[metadata]\nname = \"jq\"\n[[steps]]\naction = \"manual\"\ntext = \"get jq\"\n";

    #[test]
    fn test_recipe_dir_loader_reads_and_memoizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jq.toml");
        std::fs::write(&path, JQ).unwrap();
        let loader = DirRecipeLoader::new(dir.path());
        assert_eq!(loader.get("jq").unwrap().name(), "jq");

        // memoized: a changed file is not re-read until the cache is cleared
        std::fs::write(&path, JQ.replace("get jq", "changed")).unwrap();
        assert_eq!(loader.get("jq").unwrap().steps[0].params["text"], "get jq");
        loader.clear_cache();
        assert_eq!(loader.get("jq").unwrap().steps[0].params["text"], "changed");
    }

    #[test]
    fn test_recipe_dir_loader_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let loader = DirRecipeLoader::new(dir.path());
        let err = loader.get("nope").unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "recipe", .. }));
        assert_eq!(err.exit_code(), crate::core::error::exit::RECIPE_NOT_FOUND);
    }

    #[test]
    fn test_recipe_dir_loader_name_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("yq.toml"), JQ).unwrap();
        assert!(DirRecipeLoader::new(dir.path()).get("yq").is_err());
    }

    #[test]
    fn test_recipe_dir_loader_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("jq.toml"), JQ).unwrap();
        std::fs::write(dir.path().join("b.toml"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        assert_eq!(DirRecipeLoader::new(dir.path()).names().unwrap(), vec!["b", "jq"]);
    }

    #[test]
    fn test_recipe_tool_name_validation() {
        assert!(validate_tool_name("ripgrep").is_ok());
        assert!(validate_tool_name("node.js").is_ok());
        assert!(validate_tool_name("../etc/passwd").is_err());
        assert!(validate_tool_name("").is_err());
        assert!(validate_tool_name(".hidden").is_err());
    }

    #[test]
    fn test_recipe_split_tool_spec() {
        assert_eq!(split_tool_spec("jq"), ("jq", None));
        assert_eq!(split_tool_spec("jq@1.7.1"), ("jq", Some("1.7.1")));
        assert_eq!(split_tool_spec("jq@"), ("jq", None));
    }

    #[test]
    fn test_recipe_memory_loader() {
        let loader = MemoryRecipeLoader::new().with_toml(JQ).unwrap();
        assert!(loader.get("jq").is_ok());
        assert!(loader.get("yq").is_err());
    }
}
