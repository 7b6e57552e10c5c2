//! The "set up externals" pipeline.
//!
//! For every module, in definition order: resolve the reference, make sure
//! the revision is in the checkout cache, then link it at the module's
//! destination. Locally that is one cache and one project tree; for a fleet
//! every host gets its own cache and release tree.

use std::path::PathBuf;

use thiserror::Error;

use crate::cache::{CacheError, CheckoutCache, SlotPaths};
use crate::config::{ConfigError, ExternalModules, ModuleSpec, Settings, Target};
use crate::exec::{ExecutionContext, Host};
use crate::publish::{LocalPublisher, PublishError, RemotePublisher};
use crate::resolve::{ResolutionError, Resolver};
use crate::scm::{Scm, ScmRegistry};
use crate::types::{ModulePath, Revision};

/// Errors that stop a module from being set up.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl SetupError {
    /// The module the error is about, if it is about one.
    pub fn module(&self) -> Option<&ModulePath> {
        match self {
            Self::Config(ConfigError::Backend { module, .. }) => Some(module),
            Self::Config(ConfigError::NestedModules { inner, .. }) => Some(inner),
            Self::Config(_) => None,
            Self::Resolution(e) => Some(&e.module),
            Self::Cache(e) => Some(e.module()),
            Self::Publish(e) => Some(e.module()),
        }
    }
}

/// A module set up on one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOutcome {
    pub module: ModulePath,
    pub revision: Revision,
    /// `None` for the local project tree.
    pub host: Option<Host>,
    /// The slot the module is linked to.
    pub slot: PathBuf,
    /// Whether the revision had to be checked out.
    pub fresh: bool,
}

/// What a run did.
#[derive(Debug, Default)]
pub struct SetupReport {
    /// Modules that were attempted.
    pub modules: usize,
    pub outcomes: Vec<ModuleOutcome>,
    /// Failures of modules that were skipped over with `--keep-going`.
    pub failures: Vec<SetupError>,
}

impl SetupReport {
    pub fn fresh_checkouts(&self) -> usize {
        self.outcomes.iter().filter(|o| o.fresh).count()
    }

    pub fn cache_hits(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.fresh).count()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// `N modules, M fresh checkouts, K cache hits`
    pub fn summary(&self) -> String {
        format!(
            "{}, {}, {}",
            plural(self.modules, "module", "modules"),
            plural(self.fresh_checkouts(), "fresh checkout", "fresh checkouts"),
            plural(self.cache_hits(), "cache hit", "cache hits"),
        )
    }
}

fn plural(count: usize, one: &str, many: &str) -> String {
    format!("{} {}", count, if count == 1 { one } else { many })
}

/// Sets up a project's externals.
pub struct Externals<'a> {
    settings: &'a Settings,
    registry: &'a ScmRegistry,
    context: &'a dyn ExecutionContext,
}

/// A module with its backend built.
struct Prepared<'m> {
    module: &'m ModulePath,
    spec: &'m ModuleSpec,
    scm: Box<dyn Scm>,
}

/// Where modules are cached and linked.
enum Sink {
    Local {
        cache: CheckoutCache,
        publisher: LocalPublisher,
    },
    Fleet(RemotePublisher),
}

impl<'a> Externals<'a> {
    pub fn new(
        settings: &'a Settings,
        registry: &'a ScmRegistry,
        context: &'a dyn ExecutionContext,
    ) -> Self {
        Self {
            settings,
            registry,
            context,
        }
    }

    /// Set up every module in `modules`.
    pub fn run(&self, modules: &ExternalModules) -> Result<SetupReport, SetupError> {
        self.run_with_progress(modules, |_| {})
    }

    /// Like [`Externals::run`], calling `progress` as each module starts.
    ///
    /// Every backend is built before any module is touched, so a bad
    /// definition fails the run without side effects. After that the first
    /// failing module stops the run, unless `keep_going` is set. On a fleet a
    /// module is attempted on every host before stopping.
    pub fn run_with_progress(
        &self,
        modules: &ExternalModules,
        mut progress: impl FnMut(&ModulePath),
    ) -> Result<SetupReport, SetupError> {
        let prepared = self.prepare(modules)?;
        let sink = self.sink()?;
        let resolver = Resolver::new(&self.context);
        let mut report = SetupReport::default();

        for entry in &prepared {
            let module = entry.module;
            progress(module);
            log::info!("configuring {}", module);
            report.modules += 1;

            let mut failures = Vec::new();
            let results =
                self.setup_module(&sink, &resolver, module, entry.spec, entry.scm.as_ref());
            for result in results {
                match result {
                    Ok(outcome) => report.outcomes.push(outcome),
                    Err(e) => failures.push(e),
                }
            }

            let mut failures = failures.into_iter();
            if let Some(first) = failures.next() {
                if !self.settings.keep_going() {
                    for other in failures {
                        log::error!("{}", other);
                    }
                    return Err(first);
                }
                log::warn!("{}", first);
                report.failures.push(first);
                report.failures.extend(failures);
            }
        }

        Ok(report)
    }

    fn prepare<'m>(&self, modules: &'m ExternalModules) -> Result<Vec<Prepared<'m>>, ConfigError> {
        modules.check_nesting()?;
        modules
            .iter()
            .map(|(module, spec)| {
                self.registry
                    .build(spec)
                    .map(|scm| Prepared { module, spec, scm })
                    .map_err(|source| ConfigError::Backend {
                        module: module.clone(),
                        source,
                    })
            })
            .collect()
    }

    fn sink(&self) -> Result<Sink, ConfigError> {
        match self.settings.target() {
            Target::Local => Ok(Sink::Local {
                cache: CheckoutCache::new(SlotPaths::new(self.settings.shared_root())),
                publisher: LocalPublisher::new(self.settings.project_root()),
            }),
            Target::Fleet(fleet) => {
                if self.context.hosts().is_empty() {
                    return Err(ConfigError::Settings(
                        "the execution context has no hosts".to_string(),
                    ));
                }
                Ok(Sink::Fleet(RemotePublisher::new(
                    &fleet.shared_path,
                    &fleet.release_path,
                )))
            }
        }
    }

    /// One result per target the module was set up on.
    fn setup_module(
        &self,
        sink: &Sink,
        resolver: &Resolver<'_>,
        module: &ModulePath,
        spec: &ModuleSpec,
        scm: &dyn Scm,
    ) -> Vec<Result<ModuleOutcome, SetupError>> {
        let revision = match resolver.resolve(module, &spec.revision, scm) {
            Ok(revision) => revision,
            Err(e) => return vec![Err(e.into())],
        };

        match sink {
            Sink::Local { cache, publisher } => {
                vec![self.setup_local(cache, publisher, module, &revision, scm)]
            }
            Sink::Fleet(publisher) => self
                .context
                .hosts()
                .iter()
                .map(|host| -> Result<ModuleOutcome, SetupError> {
                    let outcome = publisher.publish(self.context, host, module, &revision, scm)?;
                    Ok(ModuleOutcome {
                        module: module.clone(),
                        revision: revision.clone(),
                        host: Some(host.clone()),
                        slot: outcome.slot,
                        fresh: outcome.fresh,
                    })
                })
                .collect(),
        }
    }

    fn setup_local(
        &self,
        cache: &CheckoutCache,
        publisher: &LocalPublisher,
        module: &ModulePath,
        revision: &Revision,
        scm: &dyn Scm,
    ) -> Result<ModuleOutcome, SetupError> {
        let slot = cache.ensure(
            module,
            revision,
            |staging| -> Result<(), Box<dyn std::error::Error>> {
                let command = scm.checkout(revision, staging)?;
                self.context.run_local(&command)?.into_result(&command)?;
                Ok(())
            },
        )?;
        publisher.publish(module, &slot.path)?;

        Ok(ModuleOutcome {
            module: module.clone(),
            revision: slot.revision,
            host: None,
            slot: slot.path,
            fresh: slot.fresh,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetSettings;
    use crate::exec::fake::RecordingFleet;
    use crate::exec::{LocalShell, ShellCapture, ShellCommand};
    use crate::scm::ScmError;
    use std::cell::Cell;
    use std::path::Path;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Resolves to the `:resolves_to` option and "checks out" with mkdir.
    struct FakeScm {
        resolves_to: String,
        fail: bool,
        checkouts: Rc<Cell<usize>>,
    }

    impl Scm for FakeScm {
        fn query_revision(&self, reference: &str, _shell: &dyn ShellCapture) -> Result<Revision, ScmError> {
            if reference == "missing" {
                return Err(ScmError::UnknownReference(reference.to_string()));
            }
            crate::scm::parse_revision(&self.resolves_to)
        }

        fn checkout(&self, revision: &Revision, destination: &Path) -> Result<ShellCommand, ScmError> {
            self.checkouts.set(self.checkouts.get() + 1);
            if self.fail {
                return Ok(
                    ShellCommand::new(["mkdir", "-p", destination.display().to_string().as_str()])
                        .and(["false"]),
                );
            }
            let mkdir = ShellCommand::new(["mkdir", "-p", destination.display().to_string().as_str()]);
            Ok(mkdir.and([
                "touch".to_string(),
                destination.join(revision.as_str()).display().to_string(),
            ]))
        }
    }

    fn registry(checkouts: &Rc<Cell<usize>>) -> ScmRegistry {
        let checkouts = Rc::clone(checkouts);
        let mut registry = ScmRegistry::empty();
        registry.register("fake".parse().unwrap(), move |spec| {
            Ok(Box::new(FakeScm {
                resolves_to: spec.option_str("resolves_to").unwrap_or_default(),
                fail: spec.option_bool("fail"),
                checkouts: Rc::clone(&checkouts),
            }))
        });
        registry
    }

    fn fake(resolves_to: &str) -> ModuleSpec {
        ModuleSpec::new("fake".parse().unwrap(), "HEAD").with_option("resolves_to", resolves_to)
    }

    fn failing(resolves_to: &str) -> ModuleSpec {
        fake(resolves_to).with_option("fail", true)
    }

    fn modules(entries: Vec<(&str, ModuleSpec)>) -> ExternalModules {
        entries
            .into_iter()
            .map(|(path, spec)| (path.parse::<ModulePath>().unwrap(), spec))
            .collect()
    }

    struct Project {
        dir: TempDir,
        root: PathBuf,
    }

    impl Project {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path().join("app");
            std::fs::create_dir_all(&root).unwrap();
            let root = std::fs::canonicalize(root).unwrap();
            Self { dir, root }
        }

        fn settings(&self) -> Settings {
            Settings::local(&self.root).unwrap()
        }

        fn slot(&self, module: &str, revision: &str) -> PathBuf {
            self.root
                .parent()
                .unwrap()
                .join("shared/externals")
                .join(module)
                .join(revision)
        }
    }

    #[test]
    fn rerun_with_same_revision_is_a_cache_hit() {
        let project = Project::new();
        let checkouts = Rc::new(Cell::new(0));
        let registry = registry(&checkouts);
        let settings = project.settings();
        let shell = LocalShell::new();
        let externals = Externals::new(&settings, &registry, &shell);
        let modules = modules(vec![("foo", fake("abc123"))]);

        let first = externals.run(&modules).unwrap();
        let second = externals.run(&modules).unwrap();

        assert_eq!(checkouts.get(), 1);
        assert_eq!(first.summary(), "1 module, 1 fresh checkout, 0 cache hits");
        assert_eq!(second.summary(), "1 module, 0 fresh checkouts, 1 cache hit");

        let slot = project.slot("foo", "abc123");
        assert_eq!(second.outcomes[0].slot, slot);
        assert_eq!(std::fs::read_link(project.root.join("foo")).unwrap(), slot);
        assert!(slot.join("abc123").is_file());
    }

    #[test]
    fn new_revision_gets_new_slot_and_keeps_old() {
        let project = Project::new();
        let checkouts = Rc::new(Cell::new(0));
        let registry = registry(&checkouts);
        let settings = project.settings();
        let shell = LocalShell::new();
        let externals = Externals::new(&settings, &registry, &shell);

        externals
            .run(&modules(vec![("vendor/foo", fake("abc123"))]))
            .unwrap();
        externals
            .run(&modules(vec![("vendor/foo", fake("def456"))]))
            .unwrap();

        assert_eq!(checkouts.get(), 2);
        assert!(project.slot("vendor/foo", "abc123").is_dir());
        assert_eq!(
            std::fs::read_link(project.root.join("vendor/foo")).unwrap(),
            project.slot("vendor/foo", "def456")
        );
    }

    #[test]
    fn progress_reports_modules_in_order() {
        let project = Project::new();
        let checkouts = Rc::new(Cell::new(0));
        let registry = registry(&checkouts);
        let settings = project.settings();
        let shell = LocalShell::new();
        let externals = Externals::new(&settings, &registry, &shell);
        let mut seen = Vec::new();

        externals
            .run_with_progress(
                &modules(vec![("b", fake("r1")), ("a", fake("r2"))]),
                |module| seen.push(module.to_string()),
            )
            .unwrap();

        assert_eq!(seen, vec!["b", "a"]);
    }

    #[test]
    fn nested_modules_fail_before_any_checkout() {
        let project = Project::new();
        let checkouts = Rc::new(Cell::new(0));
        let registry = registry(&checkouts);
        let settings = project.settings();
        let shell = LocalShell::new();
        let externals = Externals::new(&settings, &registry, &shell);

        let err = externals
            .run(&modules(vec![
                ("vendor/rails", fake("abc123")),
                ("vendor/rails/plugins/foo", fake("abc123")),
            ]))
            .unwrap_err();

        assert!(matches!(err, SetupError::Config(ConfigError::NestedModules { .. })));
        assert_eq!(err.module().unwrap().as_str(), "vendor/rails/plugins/foo");
        assert_eq!(checkouts.get(), 0);
        assert!(!project.slot("vendor/rails", "abc123").exists());
    }

    #[test]
    fn failed_svn_checkout_does_not_print_the_password() {
        let project = Project::new();
        let registry = ScmRegistry::default();
        let settings = project.settings();
        let shell = LocalShell::in_dir(&project.root);
        let externals = Externals::new(&settings, &registry, &shell);
        let solr = ModuleSpec::new("subversion".parse().unwrap(), "5")
            .with_option("repository", "file:///nonexistent/solr/trunk")
            .with_option("scm_username", "deploy")
            .with_option("scm_password", "hunter2-secret");

        let err = externals
            .run(&modules(vec![("vendor/solr", solr)]))
            .unwrap_err();

        assert!(matches!(err, SetupError::Cache(CacheError::CheckoutFailed { .. })));
        let message = err.to_string();
        assert!(!message.contains("hunter2-secret"), "{message}");
        assert!(message.contains("--password ********"), "{message}");
    }

    #[test]
    fn failed_checkout_stops_the_run() {
        let project = Project::new();
        let checkouts = Rc::new(Cell::new(0));
        let registry = registry(&checkouts);
        let settings = project.settings();
        let shell = LocalShell::new();
        let externals = Externals::new(&settings, &registry, &shell);

        let err = externals
            .run(&modules(vec![("bar", failing("def456")), ("foo", fake("abc123"))]))
            .unwrap_err();

        assert!(matches!(err, SetupError::Cache(CacheError::CheckoutFailed { .. })));
        assert_eq!(err.module().unwrap().as_str(), "bar");
        assert!(!project.slot("bar", "def456").exists());
        assert!(!project.root.join("bar").exists());
        assert!(!project.root.join("foo").exists());
    }

    #[test]
    fn keep_going_reports_every_failure() {
        let project = Project::new();
        let checkouts = Rc::new(Cell::new(0));
        let registry = registry(&checkouts);
        let settings = project.settings().with_keep_going(true);
        let shell = LocalShell::new();
        let externals = Externals::new(&settings, &registry, &shell);

        let mut bad_ref = fake("abc123");
        bad_ref.revision = "missing".to_string();
        let report = externals
            .run(&modules(vec![
                ("bar", failing("def456")),
                ("baz", bad_ref),
                ("foo", fake("abc123")),
            ]))
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.modules, 3);
        assert_eq!(report.failures.len(), 2);
        assert!(matches!(report.failures[1], SetupError::Resolution(_)));
        assert_eq!(report.outcomes.len(), 1);
        assert!(project.root.join("foo").is_symlink());
    }

    #[test]
    fn unknown_backend_fails_before_any_work() {
        let project = Project::new();
        let checkouts = Rc::new(Cell::new(0));
        let registry = registry(&checkouts);
        let settings = project.settings();
        let shell = LocalShell::new();
        let externals = Externals::new(&settings, &registry, &shell);

        let err = externals
            .run(&modules(vec![
                ("foo", fake("abc123")),
                ("baz", ModuleSpec::new("darcs".parse().unwrap(), "HEAD")),
            ]))
            .unwrap_err();

        assert!(matches!(err, SetupError::Config(ConfigError::Backend { .. })));
        assert_eq!(err.module().unwrap().as_str(), "baz");
        assert_eq!(checkouts.get(), 0);
        assert!(!project.root.join("foo").exists());
    }

    #[test]
    fn empty_definitions_do_nothing() {
        let project = Project::new();
        let checkouts = Rc::new(Cell::new(0));
        let registry = registry(&checkouts);
        let settings = project.settings();
        let shell = LocalShell::new();

        let report = Externals::new(&settings, &registry, &shell)
            .run(&ExternalModules::empty())
            .unwrap();

        assert_eq!(report.summary(), "0 modules, 0 fresh checkouts, 0 cache hits");
        assert!(!project.dir.path().join("shared").exists());
    }

    fn fleet_settings(project: &Project, hosts: &[&str]) -> Settings {
        Settings::fleet(
            &project.root,
            FleetSettings {
                hosts: hosts.iter().map(|h| h.parse().unwrap()).collect(),
                shared_path: PathBuf::from("/srv/app/shared"),
                release_path: PathBuf::from("/srv/app/releases/1"),
                ssh_options: Vec::new(),
            },
        )
        .unwrap()
    }

    #[test]
    fn fleet_sets_up_each_host_in_order() {
        let project = Project::new();
        let checkouts = Rc::new(Cell::new(0));
        let registry = registry(&checkouts);
        let settings = fleet_settings(&project, &["web1", "web2"]);
        let fleet = RecordingFleet::new(&["web1", "web2"]).exit_on("web2", "test -d", 1);
        let externals = Externals::new(&settings, &registry, &fleet);

        let report = externals
            .run(&modules(vec![("vendor/rails", fake("abc123"))]))
            .unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.summary(), "1 module, 1 fresh checkout, 1 cache hit");
        assert_eq!(report.outcomes[1].host.as_ref().unwrap().as_str(), "web2");
        assert!(report.outcomes[1].fresh);
        assert_eq!(fleet.commands_for("web1").len(), 4);
        assert_eq!(fleet.commands_for("web2").len(), 6);

        let order = fleet.host_order();
        let first_web2 = order.iter().position(|h| h == "web2").unwrap();
        assert!(order[..first_web2].iter().all(|h| h == "web1"));
        assert!(order[first_web2..].iter().all(|h| h == "web2"));
    }

    #[test]
    fn fleet_failure_still_visits_every_host_for_that_module() {
        let project = Project::new();
        let checkouts = Rc::new(Cell::new(0));
        let registry = registry(&checkouts);
        let settings = fleet_settings(&project, &["web1", "web2"]);
        let fleet = RecordingFleet::new(&["web1", "web2"]).exit_on("web1", "ln -nsf", 1);
        let externals = Externals::new(&settings, &registry, &fleet);

        let err = externals
            .run(&modules(vec![
                ("vendor/rails", fake("abc123")),
                ("vendor/solr", fake("1234")),
            ]))
            .unwrap_err();

        assert!(matches!(err, SetupError::Publish(PublishError::Remote { ref host, .. }) if host.as_str() == "web1"));
        assert!(fleet.commands_for("web2").iter().any(|c| c.contains("ln -nsf")));
        assert!(fleet.commands().iter().all(|c| !c.contains("vendor/solr")));
    }

    #[test]
    fn fleet_needs_hosts_in_context() {
        let project = Project::new();
        let checkouts = Rc::new(Cell::new(0));
        let registry = registry(&checkouts);
        let settings = fleet_settings(&project, &["web1"]);
        let shell = LocalShell::new();

        let err = Externals::new(&settings, &registry, &shell)
            .run(&modules(vec![("foo", fake("abc123"))]))
            .unwrap_err();
        assert!(matches!(err, SetupError::Config(ConfigError::Settings(_))));
    }

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[test]
    fn git_module_end_to_end() {
        if !git_available() {
            eprintln!("skipping: git is not installed");
            return;
        }

        let project = Project::new();
        let upstream = project.dir.path().join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();
        let repo = git2::Repository::init(&upstream).unwrap();
        std::fs::write(upstream.join("README"), "hello").unwrap();
        let oid = {
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("README")).unwrap();
            index.write().unwrap();
            let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
            let sig = git2::Signature::now("Test", "test@example.com").unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
                .unwrap()
        };

        let spec = ModuleSpec::new("git".parse().unwrap(), "HEAD")
            .with_option("repository", upstream.display().to_string());
        let registry = ScmRegistry::default();
        let settings = project.settings();
        let shell = LocalShell::new();

        let report = Externals::new(&settings, &registry, &shell)
            .run(&modules(vec![("vendor/upstream", spec)]))
            .unwrap();

        let sha = oid.to_string();
        assert_eq!(report.outcomes[0].revision.as_str(), sha);
        let linked = project.root.join("vendor/upstream");
        assert_eq!(std::fs::read_link(&linked).unwrap(), project.slot("vendor/upstream", &sha));
        assert_eq!(std::fs::read_to_string(linked.join("README")).unwrap(), "hello");
    }
}
