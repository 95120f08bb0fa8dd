pub mod proctor_dto;
