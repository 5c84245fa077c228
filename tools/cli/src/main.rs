//! NoteVault CLI - Command line interface for vaulted notes and attachments.
//!
//! Every command that touches vaulted content asks the configured
//! verification service before any key is derived.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use notevault_common::{Error, ItemId, ScopeId, VaultCode};
use notevault_crypto::{Envelope, EnvelopeRecord, FileBlob, TextPayload, DEFAULT_MIME_TYPE};
use notevault_storage::create_default_registry;
use notevault_vault::{
    CodeVerifier, MemoryCodeCache, NoteDraft, VaultCodeGate, VaultService, VaultSettings,
    VaultedItem, SETTINGS_FILENAME,
};

#[derive(Parser)]
#[command(name = "notevault")]
#[command(about = "NoteVault - Vaulted notes and attachments")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (default: ./notevault.json if present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Read the vault code from this environment variable instead of prompting.
    #[arg(long, global = true)]
    code_env: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the verification service whether a code is correct.
    CheckCode {
        #[arg(short, long)]
        scope: ScopeId,
    },

    /// Encrypt text into an envelope record printed as JSON.
    EncryptText {
        #[arg(short, long)]
        scope: ScopeId,

        /// Input file ("-" for stdin).
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        #[arg(short, long, value_enum, default_value = "text")]
        format: BodyFormat,
    },

    /// Decrypt an envelope record.
    DecryptText {
        #[arg(short, long)]
        scope: ScopeId,

        /// Envelope JSON file ("-" for stdin).
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },

    /// Create or show notes.
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },

    /// Attach a file to a note.
    Attach {
        #[arg(short, long)]
        id: ItemId,

        /// File to upload.
        #[arg(short, long)]
        file: PathBuf,

        /// Content type recorded for the file.
        #[arg(short, long, default_value = DEFAULT_MIME_TYPE)]
        mime: String,
    },

    /// Extract an attachment from a note.
    Extract {
        #[arg(short, long)]
        id: ItemId,

        /// Attachment display name.
        #[arg(short, long)]
        name: String,

        /// Destination file path.
        #[arg(short, long)]
        dest: PathBuf,
    },

    /// Move a note and its attachments to the other domain.
    Migrate {
        #[arg(short, long)]
        id: ItemId,

        #[arg(long, value_enum)]
        to: Target,
    },
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Create a note.
    Create {
        #[arg(short, long)]
        scope: ScopeId,

        #[arg(short, long)]
        title: String,

        /// Body file ("-" for stdin).
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        #[arg(short, long, value_enum, default_value = "text")]
        format: BodyFormat,

        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Store the note encrypted.
        #[arg(long)]
        vaulted: bool,
    },

    /// Print a note and its attachments.
    Show {
        #[arg(short, long)]
        id: ItemId,
    },

    /// List the notes in a scope.
    List {
        #[arg(short, long)]
        scope: ScopeId,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BodyFormat {
    Text,
    Html,
    TiptapJson,
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    Public,
    Vaulted,
}

/// Stand-in used when no verifier URL is configured.
struct UnconfiguredVerifier;

#[async_trait]
impl CodeVerifier for UnconfiguredVerifier {
    async fn verify(&self, _scope: &ScopeId, _code: &VaultCode) -> notevault_common::Result<bool> {
        Err(Error::Verification(
            "No verification service configured (set verifier.url)".to_string(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = load_settings(cli.config.as_deref())?;
    let app = App::new(&settings, cli.code_env)?;

    match cli.command {
        Commands::CheckCode { scope } => app.check_code(&scope).await,
        Commands::EncryptText {
            scope,
            input,
            format,
        } => app.encrypt_text(&scope, &input, format).await,
        Commands::DecryptText { scope, input } => app.decrypt_text(&scope, &input).await,
        Commands::Note { command } => match command {
            NoteCommands::Create {
                scope,
                title,
                input,
                format,
                tags,
                vaulted,
            } => {
                app.note_create(scope, title, &input, format, tags, vaulted)
                    .await
            }
            NoteCommands::Show { id } => app.note_show(&id).await,
            NoteCommands::List { scope } => app.note_list(&scope).await,
        },
        Commands::Attach { id, file, mime } => app.attach(&id, &file, mime).await,
        Commands::Extract { id, name, dest } => app.extract(&id, &name, &dest).await,
        Commands::Migrate { id, to } => app.migrate(&id, to).await,
    }
}

fn load_settings(path: Option<&Path>) -> Result<VaultSettings> {
    match path {
        Some(path) => VaultSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None if Path::new(SETTINGS_FILENAME).exists() => {
            VaultSettings::load(SETTINGS_FILENAME).context("Failed to load settings")
        }
        None => Ok(VaultSettings::default()),
    }
}

async fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("Failed to read stdin")?;
        Ok(buf)
    } else {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

fn parse_body(bytes: Vec<u8>, format: BodyFormat) -> Result<TextPayload> {
    let text = String::from_utf8(bytes).context("Input is not valid UTF-8")?;
    Ok(match format {
        BodyFormat::Text => TextPayload::Text(text),
        BodyFormat::Html => TextPayload::Html(text),
        BodyFormat::TiptapJson => {
            TextPayload::Structured(serde_json::from_str(&text).context("Invalid document JSON")?)
        }
    })
}

fn print_body(body: &TextPayload) -> Result<()> {
    match body {
        TextPayload::Text(text) | TextPayload::Html(text) => println!("{}", text),
        TextPayload::Structured(doc) => println!("{}", serde_json::to_string_pretty(doc)?),
    }
    Ok(())
}

struct App {
    service: VaultService,
    gate: Arc<VaultCodeGate>,
    code_env: Option<String>,
    codes: MemoryCodeCache,
    code_ttl: Duration,
}

impl App {
    fn new(settings: &VaultSettings, code_env: Option<String>) -> Result<Self> {
        let verifier: Arc<dyn CodeVerifier> = if settings.verifier.url.is_some() {
            settings.build_verifier().context("Failed to set up verifier")?
        } else {
            Arc::new(UnconfiguredVerifier)
        };
        let gate = Arc::new(settings.build_gate(verifier));
        let store = settings
            .build_store(&create_default_registry())
            .context("Failed to open object store")?;
        let items = settings.build_items().context("Failed to open item store")?;

        Ok(Self {
            service: VaultService::new(gate.clone(), store, items),
            gate,
            code_env,
            codes: MemoryCodeCache::new(),
            code_ttl: settings.cache_ttl(),
        })
    }

    fn user() -> String {
        std::env::var("USER").unwrap_or_else(|_| "local".to_string())
    }

    /// Read the vault code from the configured variable or a prompt.
    fn code(&self) -> Result<VaultCode> {
        let code = match &self.code_env {
            Some(var) => std::env::var(var)
                .with_context(|| format!("Environment variable {} is not set", var))?,
            None => rpassword::prompt_password("Vault code: ").context("Failed to read code")?,
        };
        if code.is_empty() {
            anyhow::bail!("Vault code cannot be empty");
        }
        Ok(VaultCode::new(code))
    }

    fn code_for(&self, item: &VaultedItem) -> Result<Option<VaultCode>> {
        if item.is_vaulted {
            self.code().map(Some)
        } else {
            Ok(None)
        }
    }

    async fn check_code(&self, scope: &ScopeId) -> Result<()> {
        let code = self.code()?;
        if self.service.check_code(scope, &code).await? {
            println!("Code accepted.");
            Ok(())
        } else {
            anyhow::bail!("Code rejected")
        }
    }

    async fn encrypt_text(&self, scope: &ScopeId, input: &Path, format: BodyFormat) -> Result<()> {
        let body = parse_body(read_input(input).await?, format)?;
        let key = self.gate.unlock(scope, &self.code()?).await?;
        let envelope = key.encode_text(&body)?;
        info!("Sealed envelope for scope {}", key.scope());
        println!("{}", envelope.to_record().to_json()?);
        Ok(())
    }

    async fn decrypt_text(&self, scope: &ScopeId, input: &Path) -> Result<()> {
        let json = String::from_utf8(read_input(input).await?).context("Envelope is not UTF-8")?;
        let record = EnvelopeRecord::from_json(&json).context("Invalid envelope")?;
        let envelope = Envelope::from_record(&record)?;

        let key = self.gate.unlock(scope, &self.code()?).await?;
        let body = key.decode_text(&envelope).context("Failed to decrypt")?;
        print_body(&body)
    }

    async fn note_create(
        &self,
        scope: ScopeId,
        title: String,
        input: &Path,
        format: BodyFormat,
        tags: Vec<String>,
        vaulted: bool,
    ) -> Result<()> {
        let body = parse_body(read_input(input).await?, format)?;
        let mut draft = NoteDraft::new(scope, title, body);
        for tag in tags {
            draft = draft.with_tag(tag);
        }

        let code = if vaulted {
            draft = draft.vaulted();
            Some(self.code()?)
        } else {
            None
        };

        let item = self
            .service
            .create_note(draft, code.as_ref())
            .await
            .context("Failed to create note")?;

        println!("Note created: {}", item.id);
        println!("  Vaulted: {}", item.is_vaulted);
        Ok(())
    }

    async fn note_show(&self, id: &ItemId) -> Result<()> {
        let item = self.service.item(id).await.context("Failed to load note")?;
        let code = self.code_for(&item)?;
        let body = self
            .service
            .read_note_cached(&Self::user(), id, code, &self.codes, self.code_ttl)
            .await
            .context("Failed to read note")?;

        println!("{} ({})", item.title, if item.is_vaulted { "vaulted" } else { "public" });
        if !item.tags.is_empty() {
            let tags: Vec<&str> = item.tags.iter().map(String::as_str).collect();
            println!("Tags: {}", tags.join(", "));
        }
        println!("Revision: {}", item.revision);
        for file in &item.file_refs {
            println!("  [FILE] {} ({}, {} bytes)", file.name, file.mime_type, file.size);
        }
        println!();
        match body {
            Some(body) => print_body(&body),
            None => Ok(()),
        }
    }

    async fn note_list(&self, scope: &ScopeId) -> Result<()> {
        let items = self.service.list(scope).await.context("Failed to list notes")?;
        if items.is_empty() {
            println!("No notes in scope {}", scope);
            return Ok(());
        }
        for item in &items {
            println!(
                "{}  {}  [{}] rev {} ({} files)",
                item.id,
                item.title,
                if item.is_vaulted { "vaulted" } else { "public" },
                item.revision,
                item.file_refs.len()
            );
        }
        Ok(())
    }

    async fn attach(&self, id: &ItemId, file: &Path, mime: String) -> Result<()> {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .context("Source has no file name")?;
        let data = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;

        let item = self.service.item(id).await.context("Failed to load note")?;
        let code = self.code_for(&item)?;
        let file_ref = self
            .service
            .attach_file(id, &name, FileBlob::new(data, mime), code.as_ref())
            .await
            .context("Failed to attach file")?;

        println!(
            "File attached: {} ({} bytes, {})",
            file_ref.name, file_ref.size, file_ref.domain
        );
        Ok(())
    }

    async fn extract(&self, id: &ItemId, name: &str, dest: &Path) -> Result<()> {
        let item = self.service.item(id).await.context("Failed to load note")?;
        let path = item
            .file_named(name)
            .map(|f| f.storage_path.clone())
            .with_context(|| format!("Note has no file named '{}'", name))?;
        let code = self.code_for(&item)?;

        let blob = self
            .service
            .read_file(id, &path, code.as_ref())
            .await
            .context("Failed to read file")?;
        tokio::fs::write(dest, &blob.data)
            .await
            .context("Failed to write output file")?;

        println!(
            "File extracted successfully: {} ({} bytes, {})",
            dest.display(),
            blob.data.len(),
            blob.mime_type
        );
        Ok(())
    }

    async fn migrate(&self, id: &ItemId, to: Target) -> Result<()> {
        let code = self.code()?;
        info!("Migrating note {}", id);
        let report = match to {
            Target::Public => self.service.make_public(id, &code).await,
            Target::Vaulted => self.service.make_vaulted(id, &code).await,
        }
        .context("Migration failed")?;

        println!("Migration {} complete:", report.direction);
        println!("  Objects migrated: {}", report.objects_migrated);
        println!("  Superseded removed: {}", report.superseded_removed);
        for path in &report.cleanup_failures {
            warn!("Superseded object left behind: {}", path);
        }
        Ok(())
    }
}
