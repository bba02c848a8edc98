fn main() {
    // OpenBLAS and LAPACK are found by pkg-config on Linux and macOS, but need linking by name on Windows
    #[cfg(windows)]
    {
        println!("cargo:rustc-link-lib=dylib=openblas");
        println!("cargo:rustc-link-lib=dylib=lapack");
    }
}
