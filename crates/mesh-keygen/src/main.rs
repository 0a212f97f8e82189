//! # Mesh Key Generator
//!
//! Generates the pre-shared node key id every node of one mesh must carry,
//! and bcrypt hashes for operator passwords.
//!
//! ## How the key id is used
//! ```text
//! _skynet_id = bcrypt(key_id)          sent by every node
//! accepted  <=> bcrypt_verify(own key_id, _skynet_id)
//! ```
//!
//! ## Usage
//! ```bash
//! # New mesh: one key id, printed with a config snippet
//! mesh-keygen
//!
//! # Hash an operator password for admin_password_hash
//! mesh-keygen --password 'correct horse' --output config/
//! ```

use std::path::{Path, PathBuf};

use clap::Parser;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;
use sha1::{Digest, Sha1};

/// Meshnode key generator
#[derive(Parser, Debug)]
#[command(name = "mesh-keygen")]
#[command(author, version, about = "Generate mesh key ids and operator password hashes", long_about = None)]
struct Args {
    /// Use this key id instead of generating one
    #[arg(short, long)]
    key_id: Option<String>,

    /// Length of a generated key id
    #[arg(short, long, default_value = "32")]
    length: usize,

    /// Operator password to hash for admin_password_hash
    #[arg(short, long)]
    password: Option<String>,

    /// bcrypt cost
    #[arg(long, default_value = "10")]
    cost: u32,

    /// Output directory for a config snippet
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

/// Everything generated in one run
#[derive(Debug, Serialize)]
struct KeyMaterial {
    key_id: String,
    /// Short fingerprint to compare key ids across nodes without revealing them
    fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    admin_password_hash: Option<String>,
}

/// Shortest key id accepted
const MIN_KEY_LENGTH: usize = 16;

/// Config snippet file name
const SNIPPET_FILE: &str = "meshnode.keys.toml";

fn main() {
    let args = Args::parse();

    if args.key_id.is_none() && args.length < MIN_KEY_LENGTH {
        eprintln!("Error: Key length must be at least {MIN_KEY_LENGTH}");
        std::process::exit(1);
    }

    let material = match build(&args) {
        Ok(material) => material,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&material) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
    } else {
        print_text(&material);
    }

    if let Some(output_dir) = args.output {
        if let Err(e) = save_snippet(&output_dir, &material) {
            eprintln!("Error saving config snippet: {e}");
            std::process::exit(1);
        }
        if !args.json {
            println!();
            println!("Config snippet saved to: {}", output_dir.join(SNIPPET_FILE).display());
        }
    }
}

fn build(args: &Args) -> Result<KeyMaterial, bcrypt::BcryptError> {
    let key_id = args
        .key_id
        .clone()
        .unwrap_or_else(|| generate_key_id(args.length));

    let admin_password_hash = args
        .password
        .as_deref()
        .map(|p| bcrypt::hash(p, args.cost))
        .transpose()?;

    Ok(KeyMaterial {
        fingerprint: fingerprint(&key_id),
        key_id,
        admin_password_hash,
    })
}

/// Random alphanumeric key id
fn generate_key_id(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// First 12 hex chars of SHA1(key_id)
fn fingerprint(key_id: &str) -> String {
    let digest = Sha1::digest(key_id.as_bytes());
    hex::encode(digest)[..12].to_string()
}

fn print_text(material: &KeyMaterial) {
    println!("Mesh Key Generator");
    println!("==================");
    println!();
    println!("Key id:      {}", material.key_id);
    println!("Fingerprint: {}", material.fingerprint);
    if let Some(hash) = &material.admin_password_hash {
        println!("Admin hash:  {hash}");
    }
    println!();
    println!("Every node in the mesh must use the same key id (KEEP PRIVATE).");
    println!();
    print!("{}", snippet(material));
}

/// TOML for config/meshnode.toml
fn snippet(material: &KeyMaterial) -> String {
    let mut out = String::new();
    if let Some(hash) = &material.admin_password_hash {
        out.push_str(&format!("admin_password_hash = \"{hash}\"\n\n"));
    }
    out.push_str("[node]\n");
    out.push_str(&format!("key_id = \"{}\"\n", material.key_id));
    out
}

fn save_snippet(output_dir: &Path, material: &KeyMaterial) -> std::io::Result<()> {
    std::fs::create_dir_all(output_dir)?;
    std::fs::write(output_dir.join(SNIPPET_FILE), snippet(material))
}
