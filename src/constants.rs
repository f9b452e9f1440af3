// Centralized constants for rootforge: workspace-relative paths and defaults

/// apk configuration directory inside the image
pub const APK_CONFIG_DIR: &str = "etc/apk";

/// Trusted signing keys, one file per key
pub const APK_KEYS_DIR: &str = "etc/apk/keys";

/// Repository list, one URL per line
pub const APK_REPOSITORIES_FILE: &str = "etc/apk/repositories";

/// Declared top-level packages, one per line
pub const APK_WORLD_FILE: &str = "etc/apk/world";

/// Architecture the package database was initialised for
pub const APK_ARCH_FILE: &str = "etc/apk/arch";

/// Installed package database directory
pub const APK_DB_DIR: &str = "lib/apk/db";

/// Installed package records
pub const APK_INSTALLED_FILE: &str = "lib/apk/db/installed";

/// Post-install script archive maintained by apk
pub const APK_SCRIPTS_TAR: &str = "lib/apk/db/scripts.tar";

/// apk download cache directory
pub const APK_CACHE_DIR: &str = "var/cache/apk";

pub const PASSWD_FILE: &str = "etc/passwd";

pub const GROUP_FILE: &str = "etc/group";

/// Root of the s6 service supervision tree
pub const SUPERVISION_DIR: &str = "sv";

/// Binary whose `--install -s` materialises applet symlinks
pub const BUSYBOX_PATH: &str = "bin/busybox";

pub const BUSYBOX_INSTALL_ARGS: &[&str] = &["--install", "-s"];

/// PATH used for processes run inside the workspace and as the image default
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Entrypoint type that turns `entrypoint.services` into an s6 tree
pub const SERVICE_BUNDLE_TYPE: &str = "service-bundle";

pub const S6_SVSCAN: &str = "/bin/s6-svscan";

pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Tool name recorded in SBOM creators and image history
pub const TOOL_NAME: &str = "rootforge";
