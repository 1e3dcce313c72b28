//! meridian-keygen — generate node and account keys.

use clap::Parser;

use meridian_core::types::{base58_encode, TokenType};
use meridian_crypto::keys::{KeyType, Keypair, Seed};

#[derive(Parser, Debug)]
#[command(name = "meridian-keygen", version, about = "Generate Meridian keys")]
struct Args {
    /// Key scheme: "secp256k1" or "ed25519".
    #[arg(long, default_value = "secp256k1")]
    key_type: String,

    /// Re-derive from an existing base58 seed instead of a fresh one.
    #[arg(long)]
    seed: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let key_type = match args.key_type.as_str() {
        "ed25519" => KeyType::Ed25519,
        "secp256k1" => KeyType::Secp256k1,
        other => anyhow::bail!("unknown key type: {other}"),
    };
    let seed = match &args.seed {
        Some(encoded) => Seed::from_base58(encoded)?,
        None => Seed::random(),
    };
    let keypair = Keypair::from_seed(key_type, &seed)?;

    println!("seed:           {}", seed.to_base58());
    println!(
        "node public:    {}",
        base58_encode(TokenType::NodePublic, keypair.public().as_slice())
    );
    println!(
        "account public: {}",
        base58_encode(TokenType::AccountPublic, keypair.public().as_slice())
    );
    println!("account id:     {}", keypair.account_id());
    Ok(())
}
