/// Anything the relay can bridge: a byte stream that can be split and moved into stage workers.
pub trait CommonStreamTrait:
    tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static
{
}

impl<T> CommonStreamTrait for T where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static
{
}
