//! grove CLI: a thin front-end over grove-core for local stores.

use std::error::Error;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use grove_core::branch::{BranchUpdate, MergeSettings};
use grove_core::commit::{ChangeAction, Commit, HistoryFilter};
use grove_core::diff::LineOp;
use grove_core::file::EntryKind;
use grove_core::reaction::Reaction;
use grove_core::{GroveError, Principal, ProjectInit, SequenceKind, Store};
use tracing_subscriber::EnvFilter;

type CmdResult = Result<(), Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "grove", about = "grove: branches, files and commits for hosted projects", version)]
struct Cli {
    /// Directory holding the `.grove` store (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Acting user. Falls back to $GROVE_USER; anonymous if neither is set.
    #[arg(long, global = true)]
    user: Option<String>,

    /// Output format: "human" (default) or "json".
    #[arg(long, global = true, default_value = "human")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new grove store.
    Init,

    /// Create, list or delete projects.
    Project {
        #[command(subcommand)]
        action: ProjectCommands,
    },

    /// List the immediate children of a directory.
    Tree {
        project: String,

        /// Directory to list.
        #[arg(default_value = "/")]
        path: String,

        /// Branch to use; defaults to the project's default branch.
        #[arg(long, short)]
        branch: Option<String>,
    },

    /// Print a file's content.
    Cat {
        project: String,
        path: String,

        /// Branch to use; defaults to the project's default branch.
        #[arg(long, short)]
        branch: Option<String>,
    },

    /// Create or overwrite a file. Content comes from --content, --file, or stdin.
    Write {
        project: String,
        path: String,

        /// Commit message.
        #[arg(long, short)]
        message: String,

        /// Branch to use; defaults to the project's default branch.
        #[arg(long, short)]
        branch: Option<String>,

        /// Literal content.
        #[arg(long, conflicts_with = "file")]
        content: Option<String>,

        /// Read content from a local file.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Delete a file.
    Rm {
        project: String,
        path: String,

        #[arg(long, short)]
        message: String,

        /// Branch to use; defaults to the project's default branch.
        #[arg(long, short)]
        branch: Option<String>,
    },

    /// Move or rename a file.
    Mv {
        project: String,
        from: String,
        to: String,

        #[arg(long, short)]
        message: String,

        /// Branch to use; defaults to the project's default branch.
        #[arg(long, short)]
        branch: Option<String>,
    },

    /// Search file names and content (case-insensitive).
    Search {
        project: String,
        query: String,

        /// Branch to use; defaults to the project's default branch.
        #[arg(long, short)]
        branch: Option<String>,
    },

    /// Show a branch's commit history, newest first.
    Log {
        project: String,

        /// Branch to use; defaults to the project's default branch.
        #[arg(long, short)]
        branch: Option<String>,

        /// Only commits by this author.
        #[arg(long)]
        author: Option<String>,

        /// Only commits at or after this RFC 3339 time.
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Only commits at or before this RFC 3339 time.
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        #[arg(long, default_value = "1")]
        page: usize,

        /// Commits per page.
        #[arg(long, short)]
        limit: Option<usize>,
    },

    /// Inspect a commit.
    Show {
        project: String,

        /// Commit hash (supports short prefix).
        commit: String,

        /// Include the before/after diff of every change.
        #[arg(long)]
        diff: bool,
    },

    /// Commits recorded between two commits, with aggregate stats.
    Compare {
        project: String,
        base: String,
        head: String,
    },

    /// Toggle a reaction on a commit, or list reactions when none is given.
    React {
        project: String,
        commit: String,

        /// thumbsUp (+1), thumbsDown (-1), laugh, hooray, confused, heart, rocket, eyes.
        reaction: Option<Reaction>,
    },

    /// Manage branches.
    Branch {
        #[command(subcommand)]
        action: BranchCommands,
    },

    /// Allocate issue and pull-request numbers.
    Seq {
        #[command(subcommand)]
        action: SeqCommands,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a project with its main branch.
    Create {
        id: String,

        /// Seed README.md in an initial commit.
        #[arg(long)]
        readme: bool,
    },
    /// List every project in the store.
    List,
    /// Delete a project and everything in it.
    Delete { id: String },
}

#[derive(Subcommand)]
enum BranchCommands {
    /// List branches, default first.
    List { project: String },
    /// Fork a new branch from an existing one.
    Create {
        project: String,
        name: String,

        /// Source branch; defaults to the project's default branch.
        #[arg(long)]
        from: Option<String>,
    },
    Protect { project: String, name: String },
    Unprotect { project: String, name: String },
    /// Make a branch the project default.
    Default { project: String, name: String },
    /// Change a branch's description or merge settings.
    Update {
        project: String,
        name: String,

        #[arg(long, conflicts_with = "clear_description")]
        description: Option<String>,

        #[arg(long)]
        clear_description: bool,

        #[arg(long)]
        require_pull_request: Option<bool>,

        #[arg(long)]
        required_approvals: Option<u32>,

        #[arg(long)]
        allow_force_push: Option<bool>,

        #[arg(long)]
        delete_after_merge: Option<bool>,
    },
    /// Delete a branch that is neither default nor protected.
    Delete {
        project: String,
        name: String,

        /// Branch the caller has checked out; it cannot be deleted.
        #[arg(long)]
        checked_out: Option<String>,
    },
    /// Recompute a branch's stats.
    Refresh { project: String, name: String },
    /// Ahead/behind counts of one branch against another.
    Divergence {
        project: String,
        name: String,

        /// Defaults to the project's default branch.
        target: Option<String>,
    },
}

#[derive(Subcommand)]
enum SeqCommands {
    /// Allocate the next number of a kind (issue or pr).
    Next { project: String, kind: SequenceKind },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("GROVE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let root = match cli.root.clone().map(Ok).unwrap_or_else(std::env::current_dir) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("error: cannot determine current directory: {e}");
            process::exit(1);
        }
    };
    let who = cli
        .user
        .clone()
        .or_else(|| std::env::var("GROVE_USER").ok())
        .filter(|u| !u.is_empty())
        .map(Principal::user)
        .unwrap_or(Principal::Anonymous);
    let json = cli.format == "json";
    tracing::debug!(root = %root.display(), user = %who, "running command");

    let result = dispatch(&root, &who, json, cli.command);

    if let Err(e) = result {
        eprintln!("error: {e}");
        // Transient store faults get EX_TEMPFAIL so scripts can retry.
        let retryable = e
            .downcast_ref::<GroveError>()
            .is_some_and(GroveError::is_retryable);
        process::exit(if retryable { 75 } else { 1 });
    }
}

fn dispatch(root: &Path, who: &Principal, json: bool, command: Commands) -> CmdResult {
    let store = || Store::open(root);
    match command {
        Commands::Init => cmd_init(root),
        Commands::Project { action } => match action {
            ProjectCommands::Create { id, readme } => cmd_project_create(&store()?, who, json, &id, readme),
            ProjectCommands::List => cmd_project_list(&store()?, json),
            ProjectCommands::Delete { id } => {
                store()?.delete_project(who, &id)?;
                println!("deleted project {id}");
                Ok(())
            }
        },
        Commands::Tree { project, path, branch } => {
            let store = store()?;
            let branch = resolve_branch(&store, who, &project, branch)?;
            cmd_tree(&store, who, json, &project, &branch, &path)
        }
        Commands::Cat { project, path, branch } => {
            let store = store()?;
            let branch = resolve_branch(&store, who, &project, branch)?;
            cmd_cat(&store, who, json, &project, &branch, &path)
        }
        Commands::Write {
            project,
            path,
            message,
            branch,
            content,
            file,
        } => {
            let content = read_content(content, file)?;
            let store = store()?;
            let branch = resolve_branch(&store, who, &project, branch)?;
            cmd_write(&store, who, json, &project, &branch, &path, &content, &message)
        }
        Commands::Rm {
            project,
            path,
            message,
            branch,
        } => {
            let store = store()?;
            let branch = resolve_branch(&store, who, &project, branch)?;
            let commit = store.remove_file(who, &project, &branch, &path, &message)?;
            print_commit_summary(&commit, json)
        }
        Commands::Mv {
            project,
            from,
            to,
            message,
            branch,
        } => {
            let store = store()?;
            let branch = resolve_branch(&store, who, &project, branch)?;
            let (_, commit) = store.move_file(who, &project, &branch, &from, &to, &message)?;
            print_commit_summary(&commit, json)
        }
        Commands::Search { project, query, branch } => {
            let store = store()?;
            let branch = resolve_branch(&store, who, &project, branch)?;
            cmd_search(&store, who, json, &project, &branch, &query)
        }
        Commands::Log {
            project,
            branch,
            author,
            since,
            until,
            page,
            limit,
        } => {
            let filter = HistoryFilter { author, since, until };
            let store = store()?;
            let branch = resolve_branch(&store, who, &project, branch)?;
            cmd_log(&store, who, json, &project, &branch, &filter, page, limit)
        }
        Commands::Show { project, commit, diff } => cmd_show(&store()?, who, json, &project, &commit, diff),
        Commands::Compare { project, base, head } => cmd_compare(&store()?, who, json, &project, &base, &head),
        Commands::React {
            project,
            commit,
            reaction,
        } => cmd_react(&store()?, who, json, &project, &commit, reaction),
        Commands::Branch { action } => cmd_branch(&store()?, who, json, action),
        Commands::Seq {
            action: SeqCommands::Next { project, kind },
        } => {
            let n = store()?.next_sequence_number(who, &project, kind)?;
            if json {
                println!("{}", serde_json::json!({ "kind": kind, "number": n }));
            } else {
                println!("{n}");
            }
            Ok(())
        }
    }
}

/// The named branch, or the project's current default when none is given.
fn resolve_branch(
    store: &Store,
    who: &Principal,
    project: &str,
    branch: Option<String>,
) -> Result<String, Box<dyn Error>> {
    match branch {
        Some(name) => Ok(name),
        None => Ok(store.get_project(who, project)?.default_branch),
    }
}

fn read_content(content: Option<String>, file: Option<PathBuf>) -> Result<String, Box<dyn Error>> {
    if let Some(c) = content {
        return Ok(c);
    }
    if let Some(path) = file {
        return Ok(std::fs::read_to_string(path)?);
    }
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn print_json<T: serde::Serialize>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn action_marker(action: ChangeAction) -> &'static str {
    match action {
        ChangeAction::Added => "+",
        ChangeAction::Modified => "~",
        ChangeAction::Deleted => "-",
        ChangeAction::Renamed => ">",
    }
}

fn print_commit_summary(commit: &Commit, json: bool) -> CmdResult {
    if json {
        return print_json(commit);
    }
    println!("[{} {}] {}", commit.branch, commit.short_hash(), commit.title());
    for c in &commit.changes {
        let from = c
            .old_path
            .as_deref()
            .map(|p| format!("{p} -> "))
            .unwrap_or_default();
        let approx = if c.approximate { " (approx)" } else { "" };
        println!(
            "  {} {from}{} (+{}, -{}){approx}",
            action_marker(c.action),
            c.file_path,
            c.lines_added,
            c.lines_deleted
        );
    }
    Ok(())
}

fn cmd_init(root: &Path) -> CmdResult {
    Store::init(root)?;
    println!("initialized grove store in .grove/");
    Ok(())
}

fn cmd_project_create(store: &Store, who: &Principal, json: bool, id: &str, readme: bool) -> CmdResult {
    let project = store.create_project(who, id, ProjectInit { readme })?;
    if json {
        return print_json(&project);
    }
    println!("created project {} (default branch {})", project.id, project.default_branch);
    if readme {
        println!("  seeded /README.md");
    }
    Ok(())
}

fn cmd_project_list(store: &Store, json: bool) -> CmdResult {
    let projects = store.list_projects()?;
    if json {
        return print_json(&projects);
    }
    if projects.is_empty() {
        println!("no projects yet");
    }
    for p in &projects {
        println!(
            "{:<24} owner:{:<12} commits:{:<5} default:{}",
            p.id, p.owner, p.ledger_head, p.default_branch
        );
    }
    Ok(())
}

fn cmd_tree(store: &Store, who: &Principal, json: bool, project: &str, branch: &str, path: &str) -> CmdResult {
    let entries = store.get_tree(who, project, branch, path)?;
    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("(empty)");
    }
    for e in &entries {
        match e.kind {
            EntryKind::Directory => println!("  {}/", e.name),
            EntryKind::File => println!(
                "  {:<32} {:>8}  {}",
                e.name,
                e.size.unwrap_or_default(),
                e.language.as_deref().unwrap_or("")
            ),
        }
    }
    Ok(())
}

fn cmd_cat(store: &Store, who: &Principal, json: bool, project: &str, branch: &str, path: &str) -> CmdResult {
    let file = store.get_content(who, project, branch, path)?;
    if json {
        return print_json(&file);
    }
    print!("{}", file.content);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_write(
    store: &Store,
    who: &Principal,
    json: bool,
    project: &str,
    branch: &str,
    path: &str,
    content: &str,
    message: &str,
) -> CmdResult {
    let (file, commit) = store.put_file(who, project, branch, path, content, message)?;
    if json {
        return print_json(&serde_json::json!({ "file": file, "commit": commit }));
    }
    print_commit_summary(&commit, false)
}

fn cmd_search(store: &Store, who: &Principal, json: bool, project: &str, branch: &str, query: &str) -> CmdResult {
    let hits = store.search_files(who, project, branch, query)?;
    if json {
        return print_json(&hits);
    }
    if hits.is_empty() {
        println!("no matches");
    }
    for f in &hits {
        println!("{}", f.record.full_path());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_log(
    store: &Store,
    who: &Principal,
    json: bool,
    project: &str,
    branch: &str,
    filter: &HistoryFilter,
    page: usize,
    limit: Option<usize>,
) -> CmdResult {
    let page = store.history(who, project, branch, filter, page, limit)?;
    if json {
        return print_json(&page);
    }
    if page.commits.is_empty() {
        println!("no commits");
        return Ok(());
    }
    for (i, c) in page.commits.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("commit {}", c.short_hash());
        println!("  author:  {}", c.author);
        println!("  time:    {}", c.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
        println!("  message: {}", c.title());
        println!(
            "  changes: {} file(s), +{} -{}",
            c.stats.files_changed, c.stats.total_lines_added, c.stats.total_lines_deleted
        );
    }
    println!(
        "\npage {}/{} ({} commit(s))",
        page.page,
        page.total_pages.max(1),
        page.total
    );
    Ok(())
}

fn cmd_show(store: &Store, who: &Principal, json: bool, project: &str, prefix: &str, show_diff: bool) -> CmdResult {
    let commit = store.find_commit(who, project, prefix)?;
    let diffs = if show_diff {
        Some(store.diff_commit(who, project, prefix)?)
    } else {
        None
    };

    if json {
        return match diffs {
            Some(diff) => print_json(&serde_json::json!({ "commit": commit, "diff": diff })),
            None => print_json(&commit),
        };
    }

    println!("commit {}", commit.hash);
    println!("  branch:  {}", commit.branch);
    println!("  author:  {}", commit.author);
    println!("  time:    {}", commit.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(parent) = commit.parent_commits.first() {
        println!("  parent:  {}", parent.short());
    }
    println!();
    for line in commit.message.lines() {
        println!("    {line}");
    }
    println!();
    print_commit_summary(&commit, false)?;

    for d in diffs.iter().flatten() {
        println!();
        let old = d.old_path.as_deref().unwrap_or(&d.path);
        if d.before_content.is_some() {
            println!("--- a{old}");
        } else {
            println!("--- /dev/null");
        }
        if d.after_content.is_some() {
            println!("+++ b{}", d.path);
        } else {
            println!("+++ /dev/null");
        }
        for hunk in &d.hunks {
            println!(
                "@@ -{},{} +{},{} @@",
                hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
            );
            for line in &hunk.lines {
                let prefix = match line.op {
                    LineOp::Add => "+",
                    LineOp::Remove => "-",
                    LineOp::Context => " ",
                };
                println!("{prefix}{}", line.content);
            }
        }
    }
    Ok(())
}

fn cmd_compare(store: &Store, who: &Principal, json: bool, project: &str, base: &str, head: &str) -> CmdResult {
    let cmp = store.compare(who, project, base, head)?;
    if json {
        return print_json(&cmp);
    }
    println!("{}..{}", cmp.base.short(), cmp.head.short());
    for c in &cmp.commits {
        println!("  {} {} {}", c.short_hash(), c.author, c.title());
    }
    println!(
        "{} commit(s), {} file(s) changed, +{} -{}",
        cmp.stats.total_commits,
        cmp.stats.files_changed,
        cmp.stats.total_lines_added,
        cmp.stats.total_lines_deleted
    );
    Ok(())
}

fn cmd_react(
    store: &Store,
    who: &Principal,
    json: bool,
    project: &str,
    prefix: &str,
    reaction: Option<Reaction>,
) -> CmdResult {
    let reactions = match reaction {
        Some(r) => store.toggle_reaction(who, project, prefix, r)?,
        None => store.reactions(who, project, prefix)?,
    };
    if json {
        return print_json(&reactions);
    }
    if reactions.is_empty() {
        println!("no reactions");
    }
    for (r, n) in reactions.summary() {
        println!("  {r:<12} {n}");
    }
    Ok(())
}

fn cmd_branch(store: &Store, who: &Principal, json: bool, action: BranchCommands) -> CmdResult {
    let branch = match action {
        BranchCommands::List { project } => {
            let branches = store.list_branches(who, &project)?;
            if json {
                return print_json(&branches);
            }
            for b in &branches {
                let marker = if b.is_default { "*" } else { " " };
                let lock = if b.is_protected { " [protected]" } else { "" };
                println!(
                    "{marker} {:<24} commits:{:<5} ahead:{:<3} behind:{:<3}{lock}",
                    b.name, b.stats.total_commits, b.stats.commits_ahead, b.stats.commits_behind
                );
            }
            return Ok(());
        }
        BranchCommands::Create { project, name, from } => {
            let from = resolve_branch(store, who, &project, from)?;
            store.fork_branch(who, &project, &name, &from)?
        }
        BranchCommands::Protect { project, name } => store.protect_branch(who, &project, &name, true)?,
        BranchCommands::Unprotect { project, name } => store.protect_branch(who, &project, &name, false)?,
        BranchCommands::Default { project, name } => store.set_default_branch(who, &project, &name)?,
        BranchCommands::Update {
            project,
            name,
            description,
            clear_description,
            require_pull_request,
            required_approvals,
            allow_force_push,
            delete_after_merge,
        } => {
            let current = store.get_branch(who, &project, &name)?.merge_settings;
            let settings = MergeSettings {
                require_pull_request: require_pull_request.unwrap_or(current.require_pull_request),
                required_approvals: required_approvals.unwrap_or(current.required_approvals),
                allow_force_push: allow_force_push.unwrap_or(current.allow_force_push),
                delete_after_merge: delete_after_merge.unwrap_or(current.delete_after_merge),
            };
            let description = if clear_description {
                Some(None)
            } else {
                description.map(Some)
            };
            let update = BranchUpdate {
                description,
                merge_settings: (settings != current).then_some(settings),
            };
            store.update_branch(who, &project, &name, update)?
        }
        BranchCommands::Delete {
            project,
            name,
            checked_out,
        } => {
            store.delete_branch(who, &project, &name, checked_out.as_deref())?;
            println!("deleted branch {name}");
            return Ok(());
        }
        BranchCommands::Refresh { project, name } => store.refresh_stats(who, &project, &name)?,
        BranchCommands::Divergence { project, name, target } => {
            let target = resolve_branch(store, who, &project, target)?;
            let d = store.divergence(who, &project, &name, &target)?;
            if json {
                return print_json(&d);
            }
            println!("{name} is {} ahead and {} behind {target}", d.ahead, d.behind);
            return Ok(());
        }
    };

    if json {
        return print_json(&branch);
    }
    println!("branch {}", branch.name);
    if let Some(ref d) = branch.description {
        println!("  description: {d}");
    }
    if let Some(ref parent) = branch.parent_branch {
        println!("  forked from: {parent}");
    }
    println!("  default:     {}", branch.is_default);
    println!("  protected:   {}", branch.is_protected);
    println!(
        "  commits:     {} (ahead {}, behind {})",
        branch.stats.total_commits, branch.stats.commits_ahead, branch.stats.commits_behind
    );
    Ok(())
}
