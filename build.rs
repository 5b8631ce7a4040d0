use std::env;

const BUILD_ENV: [&str; 5] = [
    "WIFI_SSID",
    "WIFI_PASS",
    "SUPABASE_URL",
    "SUPABASE_API_KEY",
    "DEVICE_ID",
];

fn main() {
    // Propagate ESP-IDF link/cfg/include args from esp-idf-sys.
    if let Err(err) = embuild::build::LinkArgs::output_propagated("ESP_IDF") {
        println!("cargo:warning=esp-idf link args not propagated: {err}");
    }
    if let Err(err) = embuild::build::CfgArgs::output_propagated("ESP_IDF") {
        println!("cargo:warning=esp-idf cfg args not propagated: {err}");
    }

    for name in BUILD_ENV {
        println!("cargo:rerun-if-env-changed={name}");
    }

    // Only firmware images need real credentials; the host simulator runs on defaults.
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os == "espidf" {
        for name in ["WIFI_SSID", "SUPABASE_URL", "SUPABASE_API_KEY"] {
            let missing = env::var(name).map(|v| v.trim().is_empty()).unwrap_or(true);
            if missing {
                println!("cargo:warning={name} not set, firmware will refuse to connect");
            }
        }
    }
}
