// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use tokenkey::backend::cryptoki::CryptokiBackend;
use tokenkey::config::Config;
use tokenkey::keygen::KeyGenParams;
use tokenkey::record::RECORD_VERSION;
use tokenkey::session::SlotId;
use tokenkey::ui::UserInteraction;
use tokenkey::{Result, TokenEnvironment, TokenKeyRecord};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Arguments {
    /// PKCS#11 module to use instead of the configured ones
    #[arg(short = 'm', long)]
    pkcs11_module: Option<String>,

    /// User PIN, prompted for when missing
    #[arg(short = 'p', long)]
    pin: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the slots that hold a token
    Slots,

    /// Import a public key object into a record file
    Import {
        #[arg(short = 's', long)]
        slot: SlotId,

        /// Hex encoded CKA_ID of the key
        #[arg(short = 'i', long)]
        id: String,

        output: PathBuf,
    },

    /// Describe the key held in a record file
    Show {
        #[arg(short = 'r', long, default_value_t = RECORD_VERSION)]
        record_version: u32,

        input: PathBuf,
    },

    /// Generate a key pair on a token and save its record
    Generate {
        #[arg(short = 's', long)]
        slot: SlotId,

        #[arg(short = 'l', long)]
        label: String,

        /// RSA modulus size
        #[arg(short = 'b', long, default_value_t = 2048)]
        bits: usize,

        /// Generate an EC key on this curve instead of an RSA key
        #[arg(short = 'c', long)]
        curve: Option<String>,

        output: PathBuf,
    },

    /// Delete the key held in a record file from its token
    Delete { input: PathBuf },
}

/// Prompts on the terminal
struct Console {
    pin: Option<String>,
}

impl Console {
    fn ask(&self, text: &str) -> Option<String> {
        eprint!("{} ", text);
        let _ = io::stderr().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

impl UserInteraction for Console {
    fn confirm(&mut self, text: &str) -> bool {
        match self.ask(&format!("{} [Enter to retry, q to cancel]", text)) {
            Some(answer) => answer != "q",
            None => false,
        }
    }

    fn notify(&mut self, text: &str) {
        eprintln!("{}", text);
    }

    fn yes_no(&mut self, text: &str) -> bool {
        match self.ask(&format!("{} [y/N]", text)) {
            Some(answer) => answer.eq_ignore_ascii_case("y"),
            None => false,
        }
    }

    fn prompt_pin(&mut self, label: &str) -> Option<Vec<u8>> {
        if let Some(pin) = &self.pin {
            return Some(pin.as_bytes().to_vec());
        }
        self.ask(&format!("{}:", label)).map(|p| p.into_bytes())
    }
}

fn load_environment(
    module: Option<&str>,
    config: &Config,
) -> Result<TokenEnvironment> {
    let backend = match module {
        Some(m) => CryptokiBackend::new(m)?,
        None => CryptokiBackend::from_config(config)?,
    };
    Ok(TokenEnvironment::with_backend(Box::new(backend)))
}

fn read_record(input: &PathBuf, version: u32) -> Result<TokenKeyRecord> {
    let data = fs::read(input)?;
    TokenKeyRecord::decode(&data, version)
}

fn write_record(output: &PathBuf, record: &TokenKeyRecord) -> Result<()> {
    fs::write(output, record.encode()?)?;
    println!(
        "Saved {} key \"{}\" with id {}",
        record.public_key().family(),
        record.slot_label(),
        record.object_id_hex()
    );
    Ok(())
}

fn show(record: &TokenKeyRecord, config: &Config) -> Result<()> {
    let card = record.fingerprint();
    println!("Type:       {}", record.type_string());
    println!("Label:      {}", record.slot_label());
    println!("Object id:  {}", record.object_id_hex());
    println!("Key size:   {}", record.public_key().bits()?);
    println!(
        "Card:       {} {} [{}]",
        card.manufacturer, card.model, card.label
    );
    println!("Serial:     {}", card.serial);
    let digests: Vec<String> = record
        .possible_digests(config)
        .iter()
        .map(|d| d.to_string())
        .collect();
    println!("Digests:    {}", digests.join(", "));
    println!("Default:    {}", record.default_digest());
    Ok(())
}

fn run(args: Arguments) -> Result<()> {
    let config = Config::load()?;
    let module = args.pkcs11_module.as_deref();
    let mut ui = Console { pin: args.pin };

    match args.command {
        Command::Slots => {
            let env = load_environment(module, &config)?;
            for (slot, card) in env.backend()?.list_inserted_tokens()? {
                println!(
                    "{}: {} {} [{}] serial {}",
                    slot, card.manufacturer, card.model, card.label, card.serial
                );
            }
        }
        Command::Import { slot, id, output } => {
            let env = load_environment(module, &config)?;
            let id = hex::decode(id)?;
            let record = TokenKeyRecord::import_from_slot(&env, slot, &id)?;
            write_record(&output, &record)?;
        }
        Command::Show {
            record_version,
            input,
        } => {
            let record = read_record(&input, record_version)?;
            show(&record, &config)?;
        }
        Command::Generate {
            slot,
            label,
            bits,
            curve,
            output,
        } => {
            let env = load_environment(module, &config)?;
            let params = match curve {
                Some(c) => KeyGenParams::ec(&label, &c),
                None => KeyGenParams::rsa(&label, bits),
            };
            let record = TokenKeyRecord::generate_on_token(
                &env,
                slot,
                &params,
                &config,
                &mut ui,
                &mut || eprint!("."),
            )?;
            eprintln!();
            write_record(&output, &record)?;
        }
        Command::Delete { input } => {
            let env = load_environment(module, &config)?;
            let record = read_record(&input, RECORD_VERSION)?;
            match record.delete_from_token(&env, &mut ui)? {
                None => println!("Nothing deleted"),
                Some(report) => {
                    println!("Deleted {} objects", report.deleted.len());
                    for (handle, err) in &report.failed {
                        eprintln!("Failed to delete {}: {}", handle, err);
                    }
                }
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    if tokenkey::log::tokenkey_log_init() {
        log::info!("tokenkey {} tracing enabled", env!("CARGO_PKG_VERSION"));
    }

    let args = Arguments::parse();
    match run(args) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            log::error!("{}", e);
            eprintln!("{}", e);
            ExitCode::from(0xFF)
        }
    }
}
