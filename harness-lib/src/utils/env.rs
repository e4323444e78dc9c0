pub const fn project_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

pub const fn server_identifier() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}
