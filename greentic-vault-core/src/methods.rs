/// Creates a batch of encrypted secrets.
pub const METHOD_SECRETS_CREATE: &str = "vault.secrets.create";
/// Fetches encrypted secrets together with decryption key shares.
pub const METHOD_SECRETS_GET: &str = "vault.secrets.get";
/// Replaces the encrypted value of existing secrets.
pub const METHOD_SECRETS_UPDATE: &str = "vault.secrets.update";
/// Deletes a batch of secrets by identifier.
pub const METHOD_SECRETS_DELETE: &str = "vault.secrets.delete";
/// Lists the identifiers an owner holds in a namespace.
pub const METHOD_SECRETS_LIST: &str = "vault.secrets.list";

/// Every method the vault protocol understands, in dispatch order.
pub const METHODS: [&str; 5] = [
    METHOD_SECRETS_CREATE,
    METHOD_SECRETS_GET,
    METHOD_SECRETS_UPDATE,
    METHOD_SECRETS_DELETE,
    METHOD_SECRETS_LIST,
];

/// Exclusive upper bound on batch length.
///
/// A batch must hold strictly fewer than `MAX_BATCH_SIZE` entries, so the
/// largest accepted batch is `MAX_BATCH_SIZE - 1`.
pub const MAX_BATCH_SIZE: usize = 10;

/// Returns true when `method` is one of [`METHODS`].
pub fn is_supported(method: &str) -> bool {
    METHODS.contains(&method)
}
