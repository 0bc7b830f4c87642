//! Polynomial sharing math: Feldman commitments, share verification and
//! Lagrange interpolation at zero.

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::Field;
use k256::elliptic_curve::PrimeField;
use k256::{FieldBytes, ProjectivePoint, PublicKey, Scalar};

use crate::error::WalletError;

/// A polynomial over the scalar field, degree = threshold.
pub(crate) struct Polynomial {
    coeffs: Vec<Scalar>,
}

impl Polynomial {
    pub fn new(coeffs: Vec<Scalar>) -> Self {
        debug_assert!(!coeffs.is_empty());
        Self { coeffs }
    }

    /// Random polynomial of the given degree with a fixed constant term.
    pub fn with_constant(constant: Scalar, degree: usize) -> Self {
        let mut rng = rand::thread_rng();
        let mut coeffs = vec![constant];
        coeffs.extend((0..degree).map(|_| Scalar::random(&mut rng)));
        Self { coeffs }
    }

    pub fn eval(&self, x: &Scalar) -> Scalar {
        let mut acc = Scalar::ZERO;
        for c in self.coeffs.iter().rev() {
            acc = acc * x + c;
        }
        acc
    }

    /// Feldman commitment: one curve point per coefficient.
    pub fn commitments(&self) -> Vec<ProjectivePoint> {
        self.coeffs.iter().map(|c| ProjectivePoint::GENERATOR * c).collect()
    }
}

/// Evaluate a commitment vector at `x` (the committed polynomial times G).
pub(crate) fn eval_commitments(commitments: &[ProjectivePoint], x: &Scalar) -> ProjectivePoint {
    let mut acc = ProjectivePoint::IDENTITY;
    for c in commitments.iter().rev() {
        acc = acc * x + c;
    }
    acc
}

/// Check a received share against the sender's commitments.
pub(crate) fn verify_share(commitments: &[ProjectivePoint], x: &Scalar, share: &Scalar) -> bool {
    ProjectivePoint::GENERATOR * share == eval_commitments(commitments, x)
}

/// Lagrange coefficient at zero for `xs[i]` over the point set `xs`.
pub(crate) fn lagrange_at_zero(xs: &[Scalar], i: usize) -> Result<Scalar, WalletError> {
    let xi = xs[i];
    let mut acc = Scalar::ONE;
    for (j, xj) in xs.iter().enumerate() {
        if j == i {
            continue;
        }
        let denom = Option::<Scalar>::from((*xj - xi).invert()).ok_or_else(|| {
            WalletError::InvalidConfiguration("degenerate party set in interpolation".into())
        })?;
        acc *= *xj * denom;
    }
    Ok(acc)
}

pub(crate) fn scalar_to_hex(s: &Scalar) -> String {
    hex::encode(s.to_bytes())
}

pub(crate) fn scalar_from_hex(s: &str) -> Result<Scalar, WalletError> {
    let raw = hex::decode(s)
        .map_err(|_| WalletError::ProtocolAborted("bad scalar encoding".into()))?;
    let arr: [u8; 32] = raw
        .try_into()
        .map_err(|_| WalletError::ProtocolAborted("bad scalar length".into()))?;
    Option::<Scalar>::from(Scalar::from_repr(FieldBytes::from(arr)))
        .ok_or_else(|| WalletError::ProtocolAborted("scalar out of range".into()))
}

/// Hex encoding of a point; the identity travels as "00".
pub(crate) fn point_to_hex(p: &ProjectivePoint) -> String {
    if *p == ProjectivePoint::IDENTITY {
        "00".to_string()
    } else {
        hex::encode(p.to_affine().to_encoded_point(true).as_bytes())
    }
}

pub(crate) fn point_from_hex(s: &str) -> Result<ProjectivePoint, WalletError> {
    if s == "00" {
        return Ok(ProjectivePoint::IDENTITY);
    }
    let raw = hex::decode(s)
        .map_err(|_| WalletError::ProtocolAborted("bad point encoding".into()))?;
    let pk = PublicKey::from_sec1_bytes(&raw)
        .map_err(|_| WalletError::ProtocolAborted("point not on curve".into()))?;
    Ok(pk.to_projective())
}

pub(crate) fn points_to_hex(points: &[ProjectivePoint]) -> Vec<String> {
    points.iter().map(point_to_hex).collect()
}

pub(crate) fn points_from_hex(hexes: &[String]) -> Result<Vec<ProjectivePoint>, WalletError> {
    hexes.iter().map(|h| point_from_hex(h)).collect()
}
