//! ContainerHive 一時レジストリ
//!
//! ビルドフェーズの間だけ生存するローカルOCIレジストリ（zot）と、
//! ビルド済みOCI tarのプッシュ経路を提供します。
//!
//! `__hive__/<image>` 参照は、ビルド時にこのレジストリのアドレスへ
//! 書き換えられ、依存イメージのプルを可能にします。

pub mod error;
pub mod oci;
pub mod tar;
pub mod zot;

pub use error::{RegistryError, RegistryResult};
pub use oci::{OciDescriptor, OciIndex, OciLayout, OciManifest};
pub use tar::extract_tar;
pub use zot::ZotRegistry;
