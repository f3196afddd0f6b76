//! Protobuf payloads carried inside inbound and outbound events

use crate::engine::{BoundingBox, Point as PixelPoint};
use crate::error::AuthError;
use crate::service::{AuthRequest, Decision};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Point {
    #[prost(int32, tag = "1")]
    pub x: i32,
    #[prost(int32, tag = "2")]
    pub y: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FaceCoordinates {
    #[prost(message, optional, tag = "1")]
    pub top_left: Option<Point>,
    #[prost(message, optional, tag = "2")]
    pub bottom_right: Option<Point>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FaceRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(bytes = "vec", tag = "2")]
    pub face: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub face_coordinates: Option<FaceCoordinates>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthenticateRequest {
    #[prost(message, optional, tag = "1")]
    pub face_request: Option<FaceRequest>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum AuthenticateStatus {
    Unspecified = 0,
    Ok = 1,
    Error = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthenticateResponse {
    #[prost(enumeration = "AuthenticateStatus", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(float, tag = "3")]
    pub score: f32,
    #[prost(bool, tag = "4")]
    pub decision: bool,
}

impl From<Point> for PixelPoint {
    fn from(p: Point) -> Self {
        PixelPoint { x: p.x, y: p.y }
    }
}

impl TryFrom<AuthenticateRequest> for AuthRequest {
    type Error = AuthError;

    fn try_from(request: AuthenticateRequest) -> Result<Self, Self::Error> {
        let face_request = request
            .face_request
            .ok_or_else(|| AuthError::Decode("missing face_request".to_string()))?;
        if face_request.face.is_empty() {
            return Err(AuthError::Decode("empty face image".to_string()));
        }

        let bounding_box = face_request.face_coordinates.and_then(|c| {
            BoundingBox::from_corners(c.top_left.map(Into::into), c.bottom_right.map(Into::into))
        });

        Ok(AuthRequest {
            identity: face_request.id,
            image: face_request.face,
            bounding_box,
        })
    }
}

impl From<&Decision> for AuthenticateResponse {
    fn from(decision: &Decision) -> Self {
        Self {
            status: AuthenticateStatus::Ok as i32,
            message: decision.message.clone(),
            score: decision.score,
            decision: decision.decision,
        }
    }
}
