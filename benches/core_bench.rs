//! Benchmarks for ferrule core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ferrule::core::cancel::CancelToken;
use ferrule::core::error::Error;
use ferrule::core::parser::{parse_plan, parse_recipe, plan_to_json};
use ferrule::core::planner::{compile, CompileConfig, ToolInventory};
use ferrule::core::recipe::MemoryRecipeLoader;
use ferrule::core::sysdeps;
use ferrule::core::types::{Platform, Recipe, VersionInfo};
use ferrule::core::version::{compare_versions, sort_newest_first, VersionSource};
use std::path::PathBuf;

struct Fixed;

impl VersionSource for Fixed {
    fn resolve(&self, _recipe: &Recipe, requested: Option<&str>, _cancel: &CancelToken) -> Result<VersionInfo, Error> {
        let v = requested.unwrap_or("1.2.3");
        Ok(VersionInfo::new(&format!("v{}", v), v))
    }
}

struct Nothing;

impl ToolInventory for Nothing {
    fn active_install_dir(&self, _tool: &str) -> Option<PathBuf> {
        None
    }
}

fn recipe_with_steps(name: &str, steps: usize, deps: &[&str]) -> String {
    let deps = deps.iter().map(|d| format!("\"{}\"", d)).collect::<Vec<_>>().join(", ");
    let mut text = format!(
        "[metadata]\nname = \"{name}\"\ndependencies = [{deps}]\nbinaries = [\"bin/{name}\"]\n[version]\npinned = \"1.0.0\"\n"
    );
    for i in 0..steps {
        text.push_str(&format!(
            "[[steps]]\naction = \"run_command\"\ncommand = \"echo {} {{version}} {{os}}/{{arch}} > {{install_dir}}/step-{}\"\n",
            name, i
        ));
    }
    text.push_str("[[steps]]\naction = \"apt_install\"\npackages = [\"libssl-dev\", \"pkg-config\"]\n");
    text.push_str("[[steps]]\naction = \"require_command\"\ncommand = \"git\"\n");
    text
}

fn bench_compile(c: &mut Criterion) {
    let target = Platform::new("linux", "amd64", Some("debian")).unwrap();
    let loader = MemoryRecipeLoader::new()
        .with_toml(&recipe_with_steps("zlib", 4, &[]))
        .and_then(|l| l.with_toml(&recipe_with_steps("openssl", 6, &["zlib"])))
        .unwrap();

    let mut group = c.benchmark_group("compile");
    for steps in [4, 32, 128] {
        let recipe = parse_recipe(&recipe_with_steps("app", steps, &["openssl"])).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(steps), &recipe, |b, recipe| {
            b.iter(|| {
                let cfg = CompileConfig {
                    target: target.clone(),
                    version: None,
                    versions: &Fixed,
                    loader: Some(&loader),
                    downloader: None,
                    download_cache: None,
                    inventory: &Nothing,
                    auto_accept_eval_deps: false,
                    on_eval_deps: None,
                    cancel: CancelToken::new(),
                };
                black_box(compile(black_box(recipe), &cfg).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_plan_json(c: &mut Criterion) {
    let target = Platform::new("linux", "amd64", Some("debian")).unwrap();
    let recipe = parse_recipe(&recipe_with_steps("app", 64, &[])).unwrap();
    let cfg = CompileConfig {
        target,
        version: Some("2.0.0".into()),
        versions: &Fixed,
        loader: None,
        downloader: None,
        download_cache: None,
        inventory: &Nothing,
        auto_accept_eval_deps: false,
        on_eval_deps: None,
        cancel: CancelToken::new(),
    };
    let plan = compile(&recipe, &cfg).unwrap();
    let json = plan_to_json(&plan).unwrap();

    c.bench_function("plan_to_json", |b| b.iter(|| black_box(plan_to_json(black_box(&plan)).unwrap())));
    c.bench_function("parse_plan", |b| {
        b.iter(|| black_box(parse_plan(black_box(&json), "bench").unwrap()))
    });
}

fn bench_sysdeps_render(c: &mut Criterion) {
    let target = Platform::new("linux", "amd64", Some("debian")).unwrap();
    let recipe = parse_recipe(&recipe_with_steps("app", 1, &[])).unwrap();
    let steps = ferrule::core::planner::system_steps(&recipe, &target, &VersionInfo::new("latest", "latest"), None)
        .unwrap();
    c.bench_function("sysdeps_render", |b| {
        b.iter(|| {
            let instructions = sysdeps::collect(black_box(&steps)).unwrap();
            black_box(sysdeps::render(&target, &instructions));
        });
    });
}

fn bench_version_sort(c: &mut Criterion) {
    let versions: Vec<String> = (0..200)
        .map(|i| format!("{}.{}.{}", i % 7, i % 13, i % 29))
        .collect();
    c.bench_function("sort_newest_first_200", |b| {
        b.iter(|| {
            let mut v = versions.clone();
            sort_newest_first(black_box(&mut v));
            black_box(v);
        });
    });
    c.bench_function("compare_versions", |b| {
        b.iter(|| black_box(compare_versions(black_box("1.10.0-rc.1"), black_box("1.9.12"))))
    });
}

criterion_group!(
    benches,
    bench_compile,
    bench_plan_json,
    bench_sysdeps_render,
    bench_version_sort
);
criterion_main!(benches);
