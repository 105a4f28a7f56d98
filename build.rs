fn main() {
    // Build scripts run on the host; only emit the ESP-IDF link environment
    // when cross-compiling for an ESP-IDF target (Xtensa or RISC-V chips).
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
