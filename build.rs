fn main() {
    // GDAL ships through vcpkg on Windows; elsewhere gdal-sys finds it via pkg-config.
    let target = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target == "windows" {
        vcpkg::Config::new()
            .find_package("gdal")
            .expect("GDAL not found in vcpkg");
    }
}
