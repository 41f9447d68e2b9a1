//!
//! docrepo CLI binary
//! ------------------
//! Interactive interpreter (or one-shot command runner) over a local document
//! repository catalog. Repository configs are kept under the data root so a
//! later session sees the same repositories.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use docrepo::catalog::RepoCatalog;
use docrepo::config::{BackendKind, BackendSpec, RepoConfig, RepoKind, StorageSettings};
use docrepo::driver::DriverFactory;
use docrepo::lock::{LockKind, LockService};
use docrepo::repo::Repository;
use docrepo::DocUri;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--root <data_root>] [--user <name>]            # start interactive interpreter\n  {program} [--root <data_root>] [--user <name>] -c \"<command>\"  # run one command and exit\n\nFlags:\n  --root <path>     Data root (default: $DOCREPO_ROOT, docrepo.json, or ./docrepo_data)\n  --user <name>     Author recorded on writes (default: the login name)\n  -c <command>      Run a single command\n  -h, --help        Show this help\n\n{}",
        COMMANDS
    );
}

const COMMANDS: &str = "Commands:
  repo create <authority> [REP|NREP] [MEMORY|FILE] [index <definition>]
  repo list | repo drop <authority>
  put <//authority/path> <content>     write a document
  get <//authority/path[@N]>           print content
  meta <//authority/path[@N]>          print metadata
  rm <//authority/path>                remove a document
  ls <//authority[/prefix]>            list direct children
  lsr <//authority[/prefix]> [depth]   list documents and folders below a prefix
  rmdir <//authority/prefix> [force]   remove documents below a prefix
  tag <//authority/path> <name> <value>
  untag <//authority/path> <name>
  query <authority> <SELECT ...>       query the repository index
  help | quit | exit";

enum Outcome {
    Continue(String),
    Quit,
}

struct Shell {
    catalog: RepoCatalog,
    user: String,
}

impl Shell {
    fn open(settings: StorageSettings, user: String) -> Result<Self> {
        let factory = DriverFactory::new(settings);
        let catalog_store = BackendSpec::file("_catalog");
        let configs = factory.open(&catalog_store).context("opening catalog store")?;
        // shells on the same root share the kernel locks with the catalog unless configured otherwise
        let kernel = factory.settings().kernel_lock.clone().unwrap_or(catalog_store);
        let locks = Arc::new(
            LockService::with_kernel(factory.clone(), LockKind::Document { backend: kernel }).context("opening kernel locks")?,
        );
        Ok(Self { catalog: RepoCatalog::new(factory, locks, configs), user })
    }

    fn repo(&self, authority: &str) -> Result<Arc<Repository>> {
        Ok(self.catalog.require_repo(authority)?)
    }

    fn run(&mut self, line: &str) -> Result<Outcome> {
        let line = line.trim();
        let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();
        let out = match cmd.to_ascii_lowercase().as_str() {
            "" => String::new(),
            "quit" | "exit" => return Ok(Outcome::Quit),
            "help" => COMMANDS.to_string(),
            "repo" => self.repo_command(&args)?,
            "put" => {
                let (target, content) = rest.split_once(char::is_whitespace).ok_or_else(|| anyhow!("usage: put <uri> <content>"))?;
                let uri = DocUri::parse(target)?;
                let dm = self.repo(&uri.authority)?.add_document(&uri.path, content.trim(), &self.user, "cli put", false)?;
                format!("{} version {}", uri, dm.metadata.version)
            }
            "get" => {
                let uri = DocUri::parse(arg(&args, 0, "get <uri>")?)?;
                match self.repo(&uri.authority)?.get_document(&uri.doc_path())? {
                    Some(c) => c,
                    None => format!("{} not found", uri),
                }
            }
            "meta" => {
                let uri = DocUri::parse(arg(&args, 0, "meta <uri>")?)?;
                match self.repo(&uri.authority)?.get_meta(&uri.doc_path())? {
                    Some(m) => serde_json::to_string_pretty(&m)?,
                    None => format!("{} not found", uri),
                }
            }
            "rm" => {
                let uri = DocUri::parse(arg(&args, 0, "rm <uri>")?)?;
                if self.repo(&uri.authority)?.remove_document(&uri.path, &self.user, "cli rm")? {
                    format!("removed {}", uri)
                } else {
                    format!("{} not found", uri)
                }
            }
            "ls" => {
                let uri = DocUri::parse(arg(&args, 0, "ls <uri>")?)?;
                self.repo(&uri.authority)?
                    .get_children(&uri.path)?
                    .into_iter()
                    .map(|fi| if fi.is_folder { format!("{}/", fi.name) } else { fi.name })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            "lsr" => {
                let uri = DocUri::parse(arg(&args, 0, "lsr <uri> [depth]")?)?;
                let depth = match args.get(1) {
                    Some(d) => d.parse::<usize>().with_context(|| format!("invalid depth '{}'", d))?,
                    None => 0,
                };
                self.repo(&uri.authority)?.list_docs_by_prefix(&uri.path, depth)?.join("\n")
            }
            "rmdir" => {
                let uri = DocUri::parse(arg(&args, 0, "rmdir <uri> [force]")?)?;
                let force = args.get(1).map(|f| f.eq_ignore_ascii_case("force")).unwrap_or(false);
                let removed = self.repo(&uri.authority)?.remove_children(&uri.path, force)?;
                format!("removed {} documents", removed.iter().filter(|fi| !fi.is_folder).count())
            }
            "tag" => {
                if args.len() < 3 { bail!("usage: tag <uri> <name> <value>"); }
                let uri = DocUri::parse(args[0])?;
                let value = args[2..].join(" ");
                let m = self.repo(&uri.authority)?.add_tag_to_document(&uri.path, args[1], &value)?;
                serde_json::to_string(&m.tags)?
            }
            "untag" => {
                if args.len() < 2 { bail!("usage: untag <uri> <name>"); }
                let uri = DocUri::parse(args[0])?;
                let m = self.repo(&uri.authority)?.remove_tag_from_document(&uri.path, args[1])?;
                serde_json::to_string(&m.tags)?
            }
            "query" => {
                let (authority, text) = rest.split_once(char::is_whitespace).ok_or_else(|| anyhow!("usage: query <authority> <SELECT ...>"))?;
                let result = self.repo(authority)?.find_index(text.trim())?;
                serde_json::to_string_pretty(&result)?
            }
            other => bail!("unknown command '{}'; type 'help'", other),
        };
        Ok(Outcome::Continue(out))
    }

    fn repo_command(&mut self, args: &[&str]) -> Result<String> {
        match args.first().map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("list") => Ok(self.catalog.authorities()?.join("\n")),
            Some("drop") => {
                let authority = arg(args, 1, "repo drop <authority>")?;
                Ok(if self.catalog.drop_repo(authority)? { format!("dropped {}", authority) } else { format!("{} not found", authority) })
            }
            Some("create") => {
                let authority = arg(args, 1, "repo create <authority> [REP|NREP] [MEMORY|FILE] [index <definition>]")?;
                let mut kind = RepoKind::Nrep;
                let mut backend = BackendKind::File;
                let mut index: Option<String> = None;
                let mut i = 2;
                while i < args.len() {
                    if args[i].eq_ignore_ascii_case("index") {
                        index = Some(args[i + 1..].join(" "));
                        break;
                    }
                    if let Ok(k) = args[i].parse::<RepoKind>() {
                        kind = k;
                    } else {
                        backend = args[i].parse::<BackendKind>()?;
                    }
                    i += 1;
                }
                let content = BackendSpec::new(backend, authority);
                let mut cfg = match kind {
                    RepoKind::Rep => RepoConfig::unversioned(content),
                    RepoKind::Nrep => RepoConfig::versioned(content),
                };
                if let Some(def) = index { cfg = cfg.with_index(def); }
                match self.catalog.create_repo(authority, &cfg)? {
                    Some(_) => Ok(format!("created {} ({:?}, {})", authority, kind, backend)),
                    None => bail!("could not take the creation lock for {}", authority),
                }
            }
            _ => bail!("usage: repo create|list|drop ..."),
        }
    }
}

fn arg<'a>(args: &[&'a str], i: usize, usage: &str) -> Result<&'a str> {
    args.get(i).copied().ok_or_else(|| anyhow!("usage: {}", usage))
}

fn run_repl(shell: &mut Shell) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("docrepo interpreter. Type 'help' for commands.");
    loop {
        match editor.readline("docrepo> ") {
            Ok(line) => {
                if line.trim().is_empty() { continue; }
                let _ = editor.add_history_entry(line.as_str());
                match shell.run(&line) {
                    Ok(Outcome::Quit) => break,
                    Ok(Outcome::Continue(out)) => { if !out.is_empty() { println!("{}", out); } }
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => println!("^C"),
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);
    let mut root: Option<String> = None;
    let mut user: Option<String> = None;
    let mut command: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--root" | "--user" | "-c" => {
                let Some(v) = args.get(i + 1).cloned() else {
                    eprintln!("{} requires a value", args[i]);
                    print_usage(&program);
                    std::process::exit(2);
                };
                match args[i].as_str() {
                    "--root" => root = Some(v),
                    "--user" => user = Some(v),
                    _ => command = Some(v),
                }
                i += 2;
            }
            "-h" | "--help" => { print_usage(&program); return Ok(()); }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage(&program);
                std::process::exit(2);
            }
        }
    }

    let mut settings = StorageSettings::from_env()?;
    if let Some(r) = root { settings.root = PathBuf::from(r); }
    let user = user.unwrap_or_else(whoami::username);
    let mut shell = Shell::open(settings, user)?;

    match command {
        Some(c) => match shell.run(&c) {
            Ok(Outcome::Continue(out)) => { if !out.is_empty() { println!("{}", out); } Ok(()) }
            Ok(Outcome::Quit) => Ok(()),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        None => run_repl(&mut shell),
    }
}
