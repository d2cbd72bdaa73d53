// tests/cache_build.rs

//! Merging index sources into the package cache.

mod common;

use common::{build, edges, pkg, repo, status, system};
use pkgcore::cache::DepAtom;
use pkgcore::{CompareOp, PackageStanza};

#[test]
fn test_build_is_idempotent() {
    let sources = system();
    let first = build(&sources);
    let second = build(&sources);

    assert_eq!(first.package_count(), second.package_count());
    assert_eq!(first.version_count(), second.version_count());
    assert_eq!(first.dependency_count(), second.dependency_count());
    assert_eq!(first.provides_count(), second.provides_count());
    assert_eq!(edges(&first), edges(&second));
}

#[test]
fn test_same_version_in_two_files_is_one_version() {
    let cache = build(&[
        repo("main_Packages", vec![PackageStanza::new("foo", "1.2-1")]),
        repo("mirror_Packages", vec![PackageStanza::new("foo", "1.2-1")]),
    ]);
    let foo = pkg(&cache, "foo");
    let versions: Vec<_> = cache.versions(foo).collect();
    assert_eq!(versions.len(), 1);
    assert_eq!(cache.ver_files(versions[0]).count(), 2);
    assert_eq!(cache.file_count(), 2);
}

#[test]
fn test_versions_newest_first() {
    let cache = build(&[
        repo(
            "a",
            vec![
                PackageStanza::new("tool", "1.0"),
                PackageStanza::new("tool", "2.0~beta1"),
            ],
        ),
        repo("b", vec![PackageStanza::new("tool", "2.0"), PackageStanza::new("tool", "1.5")]),
    ]);
    let tool = pkg(&cache, "tool");
    let order: Vec<&str> = cache.versions(tool).map(|v| cache.ver_str(v)).collect();
    assert_eq!(order, vec!["2.0", "2.0~beta1", "1.5", "1.0"]);
}

#[test]
fn test_reverse_dependencies_and_provides() {
    let cache = build(&system());
    let libssl = pkg(&cache, "libssl");
    let dependents: Vec<String> = cache
        .rev_depends(libssl)
        .map(|d| cache.full_name(cache.dep_parent_pkg(d)))
        .collect();
    assert_eq!(dependents.iter().filter(|n| *n == "curl:amd64").count(), 2);
    assert!(dependents.contains(&"legacy:amd64".to_string()));

    let mta = pkg(&cache, "mail-transport-agent");
    assert!(cache.is_virtual(mta));
    let providers: Vec<String> = cache.providers(mta).into_iter().map(|p| cache.full_name(p)).collect();
    assert_eq!(providers.len(), 2);
    assert!(providers.contains(&"postfix:amd64".to_string()));
}

#[test]
fn test_status_source_sets_current_version() {
    let cache = build(&system());
    let curl = pkg(&cache, "curl");
    let current = cache.current_ver(curl).unwrap();
    assert_eq!(cache.ver_str(current), "8.0");
    assert_eq!(cache.priority(current), 100);

    let newer = cache.find_version(curl, "8.5").unwrap();
    assert_eq!(cache.priority(newer), 500);
    assert!(cache.current_ver(pkg(&cache, "postfix")).is_none());
}

#[test]
fn test_all_targets_respects_version_constraint() {
    let cache = build(&[
        repo(
            "main",
            vec![
                PackageStanza::new("app", "1.0")
                    .depends(DepAtom::versioned("lib", CompareOp::GreaterEq, "2.0")),
                PackageStanza::new("lib", "1.0"),
                PackageStanza::new("lib", "2.0"),
                PackageStanza::new("lib", "3.0"),
            ],
        ),
        status(vec![]),
    ]);
    let app = pkg(&cache, "app");
    let ver = cache.versions(app).next().unwrap();
    let dep = cache.depends(ver).next().unwrap();
    let targets: Vec<&str> = cache.all_targets(dep).into_iter().map(|v| cache.ver_str(v)).collect();
    assert_eq!(targets, vec!["3.0", "2.0"]);
    assert_eq!(cache.describe_dep(dep), "lib (>= 2.0)");
}
