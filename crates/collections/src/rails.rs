//! Downstream payment rails: direct-debit adapters and fallback providers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use cobranzas_core::DomainError;

/// Direct-debit presentment rail a batch is prepared for / exported to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebitAdapter {
    /// Interbank direct debit via the COELSA clearing house.
    Coelsa,
    /// Card autodebit presented through Prisma.
    Prisma,
}

impl DebitAdapter {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebitAdapter::Coelsa => "coelsa",
            DebitAdapter::Prisma => "prisma",
        }
    }
}

impl core::fmt::Display for DebitAdapter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DebitAdapter {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coelsa" => Ok(DebitAdapter::Coelsa),
            "prisma" => Ok(DebitAdapter::Prisma),
            other => Err(DomainError::validation(format!(
                "unknown debit adapter: {other}"
            ))),
        }
    }
}

/// Alternate payment rail offered after a failed direct-debit attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackProvider {
    /// QR payment intent through Mercado Pago.
    MercadoPago,
    /// Transfer intent through MODO.
    Modo,
}

impl FallbackProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackProvider::MercadoPago => "mercado_pago",
            FallbackProvider::Modo => "modo",
        }
    }
}

impl core::fmt::Display for FallbackProvider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FallbackProvider {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mercado_pago" | "mercadopago" => Ok(FallbackProvider::MercadoPago),
            "modo" => Ok(FallbackProvider::Modo),
            other => Err(DomainError::validation(format!(
                "unknown fallback provider: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_round_trips_through_str() {
        for adapter in [DebitAdapter::Coelsa, DebitAdapter::Prisma] {
            assert_eq!(adapter.as_str().parse::<DebitAdapter>().unwrap(), adapter);
        }
    }

    #[test]
    fn provider_accepts_compact_spelling() {
        assert_eq!(
            "mercadopago".parse::<FallbackProvider>().unwrap(),
            FallbackProvider::MercadoPago
        );
    }

    #[test]
    fn unknown_rail_is_a_validation_error() {
        assert!("visa".parse::<DebitAdapter>().is_err());
        assert!("paypal".parse::<FallbackProvider>().is_err());
    }
}
