//! pcv: encrypt and decrypt Picocrypt containers from the command line.
//!
//! Arguments ending in `.pcv` are decrypted; everything else is encrypted
//! to `<name>.pcv`. The engine emits the body first and the finished
//! header afterwards, so encryption writes a blank header, streams the
//! body, then seeks back and fills the header in.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;

use pcv_engine::{header_size, Engine, EngineError, Settings};

#[derive(Parser, Debug)]
#[command(
    name = "pcv",
    version,
    about = "Picocrypt-compatible file encryption",
    long_about = "pcv: encrypt files into .pcv containers and decrypt them back.\n\
                  Files ending in .pcv are decrypted; all other files are encrypted."
)]
struct Cli {
    /// Files to process
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// (encryption) encode the body with Reed-Solomon bytes
    #[arg(long)]
    rs: bool,

    /// (encryption) paranoid mode: Serpent second layer + chained MAC
    #[arg(long)]
    paranoid: bool,

    /// (encryption) deniability mode: container is indistinguishable from
    /// random bytes
    #[arg(long)]
    deniability: bool,

    /// Keyfiles, comma separated (ex: keyfile1,keyfile2)
    #[arg(long, value_delimiter = ',')]
    keyfiles: Vec<PathBuf>,

    /// (encryption) require keyfiles in the given order
    #[arg(long)]
    ordered: bool,

    /// (decryption) keep best-effort output even if the body is corrupted
    #[arg(long)]
    keep: bool,

    /// (encryption) comments stored with the file. THESE ARE NOT ENCRYPTED.
    #[arg(long, default_value = "")]
    comments: String,

    /// Overwrite existing output files
    #[arg(long)]
    overwrite: bool,

    /// Only process files that need encryption (skip .pcv inputs)
    #[arg(long)]
    encrypt_only: bool,

    /// Only process files that need decryption (skip non-.pcv inputs)
    #[arg(long)]
    decrypt_only: bool,

    /// Read the password from this environment variable instead of
    /// prompting
    #[arg(long, env = "PCV_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let password = match &cli.password {
        Some(p) => SecretString::from(p.clone()),
        None => SecretString::from(
            rpassword::prompt_password("Password: ").context("failed to read password")?,
        ),
    };

    let total = cli.files.len();
    for (i, file) in cli.files.iter().enumerate() {
        let tag = format!("[{}/{}]", i + 1, total);
        if file.extension().is_some_and(|e| e == "pcv") {
            if cli.encrypt_only {
                println!("{tag} Skipping {} (encrypt-only is set)", file.display());
                continue;
            }
            decrypt_file(&cli, &password, file, &tag)
                .with_context(|| format!("decrypting {}", file.display()))?;
        } else {
            if cli.decrypt_only {
                println!("{tag} Skipping {} (decrypt-only is set)", file.display());
                continue;
            }
            encrypt_file(&cli, &password, file, &tag)
                .with_context(|| format!("encrypting {}", file.display()))?;
        }
    }
    Ok(())
}

fn progress_bar(prefix: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{prefix} {spinner} {bytes} ({bytes_per_sec})")
            .expect("static template"),
    );
    bar.set_prefix(prefix);
    bar
}

fn open_keyfiles(paths: &[PathBuf]) -> Result<Vec<File>> {
    paths
        .iter()
        .map(|p| File::open(p).with_context(|| format!("opening keyfile {}", p.display())))
        .collect()
}

fn create_output(path: &Path, overwrite: bool) -> Result<File> {
    if !overwrite && path.exists() {
        bail!("{} already exists (use --overwrite)", path.display());
    }
    File::create(path).with_context(|| format!("creating {}", path.display()))
}

fn encrypt_file(cli: &Cli, password: &SecretString, input: &Path, tag: &str) -> Result<()> {
    let out_path = {
        let mut name = input.as_os_str().to_owned();
        name.push(".pcv");
        PathBuf::from(name)
    };

    let settings = Settings {
        comments: cli.comments.clone(),
        reed_solomon: cli.rs,
        paranoid: cli.paranoid,
        ordered_keyfiles: cli.ordered,
        deniability: cli.deniability,
    };

    let mut source =
        File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let mut keyfiles = open_keyfiles(&cli.keyfiles)?;
    let mut keyfile_readers: Vec<&mut dyn Read> =
        keyfiles.iter_mut().map(|f| f as &mut dyn Read).collect();
    let mut output = create_output(&out_path, cli.overwrite)?;

    // Blank header now, real header after the body is streamed.
    output.write_all(&vec![0u8; header_size(&settings)])?;

    let bar = progress_bar(format!("{tag} Encrypting: {}", input.display()));
    let header = Engine::new().encrypt(
        &mut source,
        &mut bar.wrap_write(&mut output),
        password,
        &mut keyfile_readers,
        &settings,
    )?;
    bar.finish_and_clear();

    output.seek(SeekFrom::Start(0))?;
    output.write_all(&header)?;

    println!(
        "{tag} Encrypted {} to {}",
        input.display(),
        out_path.display()
    );
    Ok(())
}

fn decrypt_file(cli: &Cli, password: &SecretString, input: &Path, tag: &str) -> Result<()> {
    let out_path = input.with_extension("");

    let mut source =
        File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let mut keyfiles = open_keyfiles(&cli.keyfiles)?;
    let mut keyfile_readers: Vec<&mut dyn Read> =
        keyfiles.iter_mut().map(|f| f as &mut dyn Read).collect();
    let mut output = create_output(&out_path, cli.overwrite)?;

    let bar = progress_bar(format!("{tag} Decrypting: {}", input.display()));
    let result = Engine::new().decrypt(
        &mut source,
        &mut bar.wrap_write(&mut output),
        password,
        &mut keyfile_readers,
        cli.keep,
    );
    bar.finish_and_clear();

    match result {
        Ok(damaged) => {
            if damaged {
                println!(
                    "Warning: {} was damaged but recovered with Reed-Solomon bytes. \
                     Consider re-encrypting the file.",
                    input.display()
                );
            }
            println!(
                "{tag} Decrypted {} to {}",
                input.display(),
                out_path.display()
            );
            Ok(())
        }
        Err(err) => {
            let keep_output = cli.keep && matches!(err, EngineError::BodyCorrupted);
            if !keep_output {
                if let Err(remove_err) = std::fs::remove_file(&out_path) {
                    eprintln!("error removing {}: {remove_err}", out_path.display());
                }
            }
            Err(err.into())
        }
    }
}
