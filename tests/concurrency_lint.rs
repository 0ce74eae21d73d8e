#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! AST-level checks on the concurrency rules of the crate.
//!
//! 1. No `.await` while a lock guard is alive. The producer-facing paths
//!    (`submit_frame`, smoother ticks) share std mutexes with async tasks;
//!    a guard held across a suspension point would stall the frame source.
//!
//! ```ignore
//! // BAD
//! let mut last = lock(&self.last);
//! socket.send(&packet).await?;
//!
//! // GOOD
//! let packets = { lock(&self.last).packets.clone() };
//! socket.send(&packets[0]).await?;
//! ```
//!
//! 2. Every `loop` inside a spawned task selects on something (in practice a
//!    `CancellationToken`), so `disconnect()` and `stop()` finish in bounded
//!    time.

use std::fs;
use std::path::{Path, PathBuf};
use syn::visit::Visit;
use syn::{Expr, ExprAwait, ExprCall, ExprLoop, ExprMacro, ExprMethodCall, File, Local, Macro, Pat, StmtMacro};
use walkdir::WalkDir;

type Violation = (String, String);

fn source_files() -> Vec<PathBuf> {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    WalkDir::new(src_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn parse(path: &Path) -> Option<File> {
    let content = fs::read_to_string(path).ok()?;
    match syn::parse_file(&content) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
            None
        }
    }
}

fn path_string(path: &syn::Path) -> String {
    path.segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect::<Vec<_>>()
        .join("::")
}

// ---------------------------------------------------------------------------
// Guards held across .await
// ---------------------------------------------------------------------------

const LOCK_METHODS: &[&str] = &["lock", "read", "write", "try_lock", "try_read", "try_write"];

/// Guards that are meant to span awaits: (file suffix, guard name).
const GUARD_ALLOWLIST: &[(&str, &str)] = &[
    // tokio mutex that serializes connect() against disconnect()
    ("connection/manager.rs", "_guard"),
];

struct GuardVisitor {
    file: String,
    depth: usize,
    /// (guard name, block depth it was bound at)
    guards: Vec<(String, usize)>,
    violations: Vec<Violation>,
}

impl GuardVisitor {
    fn new(file: String) -> Self {
        Self {
            file,
            depth: 0,
            guards: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// `x.lock()`, `x.lock().await` or the crate's `lock(&x)` helper, as the
    /// whole initializer. Anything chained after it drops the guard at once.
    fn acquires_guard(expr: &Expr) -> bool {
        match expr {
            Expr::Await(inner) => Self::acquires_guard(&inner.base),
            Expr::MethodCall(call) => LOCK_METHODS.contains(&call.method.to_string().as_str()),
            Expr::Call(call) => match &*call.func {
                Expr::Path(p) => {
                    let name = path_string(&p.path);
                    name == "lock" || name.ends_with("::lock")
                }
                _ => false,
            },
            _ => false,
        }
    }
}

impl<'ast> Visit<'ast> for GuardVisitor {
    fn visit_local(&mut self, local: &'ast Local) {
        if let Some(init) = &local.init {
            if Self::acquires_guard(&init.expr) {
                let pat = match &local.pat {
                    Pat::Type(typed) => &*typed.pat,
                    other => other,
                };
                if let Pat::Ident(ident) = pat {
                    self.guards.push((ident.ident.to_string(), self.depth));
                }
            }
        }
        syn::visit::visit_local(self, local);
    }

    fn visit_expr_await(&mut self, await_expr: &'ast ExprAwait) {
        let is_acquisition = matches!(
            &*await_expr.base,
            Expr::MethodCall(call) if LOCK_METHODS.contains(&call.method.to_string().as_str())
        );
        if !is_acquisition && !self.guards.is_empty() {
            let names: Vec<_> = self.guards.iter().map(|(n, _)| n.as_str()).collect();
            self.violations
                .push((self.file.clone(), names.join(", ")));
        }
        syn::visit::visit_expr_await(self, await_expr);
    }

    fn visit_block(&mut self, block: &'ast syn::Block) {
        self.depth += 1;
        syn::visit::visit_block(self, block);
        let depth = self.depth;
        self.guards.retain(|(_, d)| *d < depth);
        self.depth -= 1;
    }

    fn visit_expr_closure(&mut self, closure: &'ast syn::ExprClosure) {
        // A closure body runs elsewhere; guards of the enclosing scope do
        // not reach its awaits.
        let saved = std::mem::take(&mut self.guards);
        syn::visit::visit_expr_closure(self, closure);
        self.guards = saved;
    }

    fn visit_expr_async(&mut self, block: &'ast syn::ExprAsync) {
        let saved = std::mem::take(&mut self.guards);
        syn::visit::visit_expr_async(self, block);
        self.guards = saved;
    }

    fn visit_expr_call(&mut self, call: &'ast ExprCall) {
        if let Expr::Path(func) = &*call.func {
            if func.path.is_ident("drop") {
                if let Some(Expr::Path(arg)) = call.args.first() {
                    if let Some(ident) = arg.path.get_ident() {
                        let name = ident.to_string();
                        self.guards.retain(|(g, _)| *g != name);
                    }
                }
            }
        }
        syn::visit::visit_expr_call(self, call);
    }
}

fn guard_violations(file: &str, syntax: &File) -> Vec<Violation> {
    let mut visitor = GuardVisitor::new(file.to_string());
    visitor.visit_file(syntax);
    visitor
        .violations
        .into_iter()
        .filter(|(file, guards)| {
            !guards.split(", ").all(|g| {
                GUARD_ALLOWLIST
                    .iter()
                    .any(|(suffix, name)| file.ends_with(suffix) && g == *name)
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Uncancellable spawned loops
// ---------------------------------------------------------------------------

struct SpawnLoopVisitor {
    file: String,
    spawn_depth: usize,
    loop_depth: usize,
    saw_select: bool,
    violations: Vec<Violation>,
}

impl SpawnLoopVisitor {
    fn new(file: String) -> Self {
        Self {
            file,
            spawn_depth: 0,
            loop_depth: 0,
            saw_select: false,
            violations: Vec::new(),
        }
    }

    fn is_select(mac: &Macro) -> bool {
        matches!(path_string(&mac.path).as_str(), "tokio::select" | "select")
    }

    fn note_macro(&mut self, mac: &Macro) {
        if self.loop_depth > 0 && Self::is_select(mac) {
            self.saw_select = true;
        }
    }
}

impl<'ast> Visit<'ast> for SpawnLoopVisitor {
    fn visit_expr_call(&mut self, call: &'ast ExprCall) {
        let spawns = matches!(&*call.func, Expr::Path(p) if path_string(&p.path) == "tokio::spawn");
        if spawns {
            self.spawn_depth += 1;
            for arg in &call.args {
                self.visit_expr(arg);
            }
            self.spawn_depth -= 1;
        } else {
            syn::visit::visit_expr_call(self, call);
        }
    }

    fn visit_expr_method_call(&mut self, call: &'ast ExprMethodCall) {
        if call.method == "spawn" {
            self.spawn_depth += 1;
            for arg in &call.args {
                self.visit_expr(arg);
            }
            self.spawn_depth -= 1;
        } else {
            syn::visit::visit_expr_method_call(self, call);
        }
    }

    fn visit_expr_loop(&mut self, loop_expr: &'ast ExprLoop) {
        if self.spawn_depth == 0 {
            syn::visit::visit_expr_loop(self, loop_expr);
            return;
        }
        self.loop_depth += 1;
        let outer = std::mem::replace(&mut self.saw_select, false);
        syn::visit::visit_expr_loop(self, loop_expr);
        if !self.saw_select {
            let label = loop_expr
                .label
                .as_ref()
                .map(|l| format!("'{}", l.name.ident))
                .unwrap_or_else(|| "loop".to_string());
            self.violations.push((
                self.file.clone(),
                format!("spawned {} without select!", label),
            ));
        }
        self.saw_select = outer || self.saw_select;
        self.loop_depth -= 1;
    }

    fn visit_expr_macro(&mut self, mac: &'ast ExprMacro) {
        self.note_macro(&mac.mac);
        syn::visit::visit_expr_macro(self, mac);
    }

    fn visit_stmt_macro(&mut self, mac: &'ast StmtMacro) {
        self.note_macro(&mac.mac);
        syn::visit::visit_stmt_macro(self, mac);
    }
}

fn spawn_violations(file: &str, syntax: &File) -> Vec<Violation> {
    let mut visitor = SpawnLoopVisitor::new(file.to_string());
    visitor.visit_file(syntax);
    visitor.violations
}

fn check(code: &str, f: fn(&str, &File) -> Vec<Violation>) -> Vec<Violation> {
    let syntax: File = syn::parse_file(code).unwrap();
    f("test.rs", &syntax)
}

// ---------------------------------------------------------------------------
// Self-tests
// ---------------------------------------------------------------------------

#[test]
fn flags_std_guard_across_await() {
    let code = r#"
        async fn send(&self) {
            let mut last = lock(&self.last);
            socket.send(&last.packets[0]).await;
        }
    "#;
    assert_eq!(check(code, guard_violations).len(), 1);
}

#[test]
fn flags_method_guard_across_await() {
    let code = r#"
        async fn send(&self) {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            other().await;
        }
    "#;
    // `unwrap_or_else` is the outer call, so this is not a bare guard;
    // the bare form is what gets flagged.
    assert!(check(code, guard_violations).is_empty());

    let code = r#"
        async fn send(&self) {
            let state: MutexGuard<'_, State> = self.state.lock();
            other().await;
        }
    "#;
    assert_eq!(check(code, guard_violations).len(), 1);
}

#[test]
fn allows_scoped_and_dropped_guards() {
    let code = r#"
        async fn send(&self) {
            let packets = {
                let last = lock(&self.last);
                last.packets.clone()
            };
            socket.send(&packets[0]).await;

            let guard = lock(&self.other);
            drop(guard);
            other().await;

            let handle = lock(&self.task).take();
            handle.await;
        }
    "#;
    assert!(check(code, guard_violations).is_empty());
}

#[test]
fn spawned_task_does_not_inherit_guards() {
    let code = r#"
        fn start(&self) {
            let mut shutdown = lock(&self.shutdown);
            tokio::spawn(async move {
                tick().await;
            });
        }
    "#;
    assert!(check(code, guard_violations).is_empty());
}

#[test]
fn flags_spawned_loop_without_select() {
    let code = r#"
        fn start() {
            tokio::spawn(async move {
                loop {
                    ticker.tick().await;
                }
            });
        }
    "#;
    assert_eq!(check(code, spawn_violations).len(), 1);
}

#[test]
fn allows_spawned_loop_with_select() {
    let code = r#"
        fn start() {
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                }
            });
        }
    "#;
    assert!(check(code, spawn_violations).is_empty());
}

// ---------------------------------------------------------------------------
// Crate scan
// ---------------------------------------------------------------------------

fn scan(f: fn(&str, &File) -> Vec<Violation>) -> Vec<Violation> {
    source_files()
        .iter()
        .filter_map(|path| parse(path).map(|syntax| f(&path.display().to_string(), &syntax)))
        .flatten()
        .collect()
}

fn report(title: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    let mut msg = format!("\n\n{}\n\nViolations:\n", title);
    for (file, context) in violations {
        msg.push_str(&format!("  - {}: {}\n", file, context));
    }
    panic!("{}", msg);
}

#[test]
fn no_await_while_holding_guard() {
    report(
        "Found .await while a lock guard is alive. Copy what you need inside a block and await after it.",
        &scan(guard_violations),
    );
}

#[test]
fn spawned_loops_are_cancellable() {
    report(
        "Found a spawned loop without tokio::select!. Select on the task's CancellationToken.",
        &scan(spawn_violations),
    );
}
