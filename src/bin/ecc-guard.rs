//! ECC Guard CLI: key material and envelope tooling for operators
//!
//! Usage:
//!   ecc-guard keygen  --name <NAME>
//!   ecc-guard encrypt --to <NAME>.pub --signer <NAME>.key (--in <FILE> | --text <TEXT>)
//!   ecc-guard decrypt --key <NAME>.key --in <ENVELOPE> [--from <NAME>.pub]
//!   ecc-guard sign    --key <NAME>.key --text <TEXT>
//!   ecc-guard verify  --pub <NAME>.pub --text <TEXT> --sig <HEX>
//!   ecc-guard config  [--file <CONFIG.json> | --env 1]

use std::fs;
use std::process;

use ecc_guard::crypto::{self, PrivateKey, PublicPoint, SecurityEnvelope};
use ecc_guard::{GuardConfig, SecurityService};

fn usage() -> ! {
    eprintln!(
        "ecc-guard: secp256k1 envelope tooling (ECDH + AES-256-GCM + ECDSA)\n\
         \n\
         Commands:\n\
         \n\
         Generate a keypair:\n\
         \n\
         ecc-guard keygen --name <NAME>\n\
         Writes <NAME>.key (private scalar hex) and <NAME>.pub (JSON coordinates)\n\
         \n\
         Encrypt for a recipient, signed by the sender:\n\
         \n\
         ecc-guard encrypt --to <NAME>.pub --signer <NAME>.key (--in <FILE> | --text <TEXT>)\n\
         Prints the envelope JSON\n\
         \n\
         Decrypt an envelope, optionally checking the sender's signature:\n\
         \n\
         ecc-guard decrypt --key <NAME>.key --in <ENVELOPE> [--from <NAME>.pub]\n\
         \n\
         Sign or verify a message:\n\
         \n\
         ecc-guard sign --key <NAME>.key --text <TEXT>\n\
         ecc-guard verify --pub <NAME>.pub --text <TEXT> --sig <HEX>\n\
         \n\
         Print the default configuration, or check one (from a file, or ECC_GUARD_* variables):\n\
         \n\
         ecc-guard config [--file <CONFIG.json> | --env 1]\n"
    );
    process::exit(1);
}

fn die(msg: &str) -> ! {
    eprintln!("error: {}", msg);
    process::exit(1);
}

fn init_logging() {
    let log_format = std::env::var("ECC_GUARD_LOG_FORMAT").unwrap_or_else(|_| "pretty".into());
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "ecc_guard=info".into());
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn parse_args() -> (String, Vec<(String, String)>) {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        usage();
    }

    let command = args[1].clone();
    let mut flags: Vec<(String, String)> = Vec::new();

    let mut i = 2;
    while i < args.len() {
        if args[i].starts_with("--") && i + 1 < args.len() {
            flags.push((args[i].clone(), args[i + 1].clone()));
            i += 2;
        } else {
            die(&format!("unexpected argument: {}", args[i]));
        }
    }

    (command, flags)
}

fn get_flag(flags: &[(String, String)], name: &str) -> Option<String> {
    flags.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
}

fn require_flag(flags: &[(String, String)], name: &str) -> String {
    get_flag(flags, name).unwrap_or_else(|| die(&format!("missing required flag: {}", name)))
}

fn read_text(path: &str) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| die(&format!("read {}: {}", path, e)))
}

fn load_private(path: &str) -> PrivateKey {
    crypto::build_private_key(read_text(path).trim()).unwrap_or_else(|_| die("invalid private key file"))
}

fn load_public(path: &str) -> PublicPoint {
    serde_json::from_str(&read_text(path)).unwrap_or_else(|_| die("invalid public key file"))
}

fn cmd_keygen(flags: &[(String, String)]) {
    let name = require_flag(flags, "--name");
    let pair = crypto::generate_key_pair();

    let key_path = format!("{}.key", name);
    let pub_path = format!("{}.pub", name);
    let pub_json =
        serde_json::to_string_pretty(&pair.public).unwrap_or_else(|e| die(&format!("encode public key: {}", e)));

    fs::write(&key_path, pair.private.to_hex().as_bytes())
        .unwrap_or_else(|e| die(&format!("write {}: {}", key_path, e)));
    fs::write(&pub_path, pub_json).unwrap_or_else(|e| die(&format!("write {}: {}", pub_path, e)));

    eprintln!("keypair generated:");
    eprintln!("  private key: {}", key_path);
    eprintln!("  public key:  {} (x = {})", pub_path, pair.public.x());
    eprintln!();
    eprintln!("keep {0} safe. share {1} freely.", key_path, pub_path);
}

fn cmd_encrypt(flags: &[(String, String)]) {
    let recipient = load_public(&require_flag(flags, "--to"));
    let signer = load_private(&require_flag(flags, "--signer"));
    let plaintext = match (get_flag(flags, "--in"), get_flag(flags, "--text")) {
        (Some(path), None) => read_text(&path),
        (None, Some(text)) => text,
        _ => die("pass exactly one of --in or --text"),
    };

    let envelope = crypto::encrypt(&plaintext, &recipient, &signer).unwrap_or_else(|_| die("encryption failed"));
    let json = envelope
        .to_json()
        .unwrap_or_else(|e| die(&format!("encode envelope: {}", e)));
    println!("{}", json);
}

fn cmd_decrypt(flags: &[(String, String)]) {
    let key = load_private(&require_flag(flags, "--key"));
    let in_file = require_flag(flags, "--in");
    let envelope =
        SecurityEnvelope::from_json(&read_text(&in_file)).unwrap_or_else(|e| die(&format!("parse {}: {}", in_file, e)));

    if let Some(sender) = get_flag(flags, "--from") {
        let sender = load_public(&sender);
        match crypto::verify(&envelope.ciphertext, &envelope.signature, &sender) {
            Ok(true) => eprintln!("signature: valid"),
            _ => die("signature does not match the sender key"),
        }
    }

    let plaintext = crypto::decrypt(&envelope, &key)
        .unwrap_or_else(|_| die("decryption failed (wrong key, corrupted, or malformed envelope)"));
    println!("{}", plaintext);
}

fn cmd_sign(flags: &[(String, String)]) {
    let key = load_private(&require_flag(flags, "--key"));
    let text = require_flag(flags, "--text");
    let signature = crypto::sign(&text, &key).unwrap_or_else(|_| die("signing failed"));
    println!("{}", signature);
}

fn cmd_verify(flags: &[(String, String)]) {
    let key = load_public(&require_flag(flags, "--pub"));
    let text = require_flag(flags, "--text");
    let signature = require_flag(flags, "--sig");
    match crypto::verify(&text, &signature, &key) {
        Ok(true) => println!("valid"),
        Ok(false) => {
            println!("invalid");
            process::exit(2);
        }
        Err(e) => die(&format!("cannot verify: {}", e)),
    }
}

fn cmd_config(flags: &[(String, String)]) {
    let config = match (get_flag(flags, "--file"), get_flag(flags, "--env")) {
        (Some(path), _) => GuardConfig::from_file(&path),
        (None, Some(_)) => GuardConfig::from_env(),
        (None, None) => {
            let json = serde_json::to_string_pretty(&GuardConfig::default())
                .unwrap_or_else(|e| die(&format!("encode config: {}", e)));
            println!("{}", json);
            return;
        }
    }
    .unwrap_or_else(|e| die(&format!("load config: {}", e)));

    config
        .validate()
        .unwrap_or_else(|e| die(&format!("invalid config: {}", e)));
    println!("{}", config.summary());

    if config.enabled {
        let service = SecurityService::from_config(&config).unwrap_or_else(|e| die(&e.to_string()));
        let key = service.server_public_key();
        println!("server public key x = {}", key.x());
        println!("server public key y = {}", key.y());
    }
}

fn main() {
    init_logging();
    let (command, flags) = parse_args();

    match command.as_str() {
        "keygen" => cmd_keygen(&flags),
        "encrypt" => cmd_encrypt(&flags),
        "decrypt" => cmd_decrypt(&flags),
        "sign" => cmd_sign(&flags),
        "verify" => cmd_verify(&flags),
        "config" => cmd_config(&flags),
        _ => {
            eprintln!("unknown command: {}", command);
            usage();
        }
    }
}
