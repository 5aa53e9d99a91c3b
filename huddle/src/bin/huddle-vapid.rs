use base64::Engine as _;
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let json = args.iter().any(|a| a == "--json");

    let signing_key = SigningKey::random(&mut OsRng);
    let private_key_raw = signing_key.to_bytes();
    let public_key_raw = signing_key
        .verifying_key()
        .to_encoded_point(false)
        .to_bytes();

    let public_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(public_key_raw);
    let private_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(private_key_raw);

    if json {
        let keys = serde_json::json!({
            "public_key": public_b64,
            "private_key": private_b64,
        });
        println!("{keys}");
    } else {
        println!("WEB_PUSH_VAPID_PUBLIC_KEY={public_b64}");
        println!("WEB_PUSH_VAPID_PRIVATE_KEY={private_b64}");
    }

    Ok(())
}

fn print_help() {
    println!("huddle-vapid - Generate a VAPID key pair for Web Push");
    println!();
    println!("Usage:");
    println!("  huddle-vapid           # prints .env lines");
    println!("  huddle-vapid --json    # prints JSON");
    println!();
    println!("Also set WEB_PUSH_VAPID_SUBJECT, e.g. mailto:ops@your-club.org");
}
